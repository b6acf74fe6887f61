//! Mute-word matching over stemmed tokens.
use std::collections::HashSet;

use rust_stemmers::{Algorithm, Stemmer};

use super::html::extract_text;

const STRIPPED_PUNCTUATION: [char; 9] = ['.', ',', '!', '?', '(', ')', ':', ';', '"'];

/// Lower-cased English stems of the whitespace-separated tokens in `text`.
///
/// `.,!?():;"` are removed from every token first; tokens left empty are
/// dropped.
pub fn stems<'a>(stemmer: &'a Stemmer, text: &'a str) -> impl Iterator<Item = String> + 'a {
    text.split_whitespace().filter_map(move |token| {
        let cleaned: String = token
            .chars()
            .filter(|c| !STRIPPED_PUNCTUATION.contains(c))
            .collect::<String>()
            .to_lowercase();
        if cleaned.is_empty() {
            None
        } else {
            Some(stemmer.stem(&cleaned).into_owned())
        }
    })
}

/// A user's mute words, pre-stemmed.
pub struct MuteFilter {
    stemmer: Stemmer,
    muted: HashSet<String>,
}

impl MuteFilter {
    pub fn new(words: &[String]) -> Self {
        let stemmer = Stemmer::create(Algorithm::English);
        let muted = words
            .iter()
            .flat_map(|word| stems(&stemmer, word).collect::<Vec<_>>())
            .collect();
        Self { stemmer, muted }
    }

    pub fn is_empty(&self) -> bool {
        self.muted.is_empty()
    }

    /// Whether any stem of `text` is a muted stem.
    pub fn matches(&self, text: &str) -> bool {
        !self.muted.is_empty() && stems(&self.stemmer, text).any(|s| self.muted.contains(&s))
    }

    /// Whether an article with this title, summary and HTML content is muted.
    pub fn is_muted(&self, title: &str, summary: &str, content: &str) -> bool {
        if self.muted.is_empty() {
            return false;
        }
        self.matches(title)
            || self.matches(&extract_text(summary))
            || self.matches(&extract_text(content))
    }
}

impl std::fmt::Debug for MuteFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuteFilter")
            .field("muted", &self.muted)
            .finish()
    }
}
