//! Similarity predicate used to find an incoming article's existing duplicates.
use crate::config::Config;
use crate::storage::Article;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DedupMode {
    /// Byte-equal links.
    #[default]
    Strict,
    /// Edit distance of `title + summary` at most `max_edit` times the length
    /// of the longer string.
    Fuzzy { max_edit: f64 },
}

impl DedupMode {
    pub fn from_config(config: &Config) -> Self {
        if config.strict_dedup {
            DedupMode::Strict
        } else {
            DedupMode::Fuzzy {
                max_edit: config.max_edit_dedup,
            }
        }
    }
}

/// Symmetric in `a` and `b` for both modes.
pub fn is_similar(mode: DedupMode, a: &Article, b: &Article) -> bool {
    match mode {
        DedupMode::Strict => a.link == b.link,
        DedupMode::Fuzzy { max_edit } => {
            let left = format!("{}{}", a.title, a.summary);
            let right = format!("{}{}", b.title, b.summary);
            let longer = left.chars().count().max(right.chars().count());
            let distance = strsim::levenshtein(&left, &right);
            distance as f64 <= max_edit * longer as f64
        }
    }
}
