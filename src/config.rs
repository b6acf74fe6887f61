//! Configuration file parser for feedpump.toml.
//!
//! The config file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are accepted and logged as a warning so typos are visible.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Ingestion configuration, built once at startup and shared as `Arc<Config>`.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Apply a strict UGC sanitization policy to article bodies.
    pub sanitize_html: bool,

    /// Resize favicons to 256x256 PNG.
    pub normalize_favicons: bool,

    /// Exact-link duplicate detection instead of bounded edit distance.
    pub strict_dedup: bool,

    /// Edit-distance threshold, as a fraction of the longer string, when
    /// `strict_dedup` is off.
    pub max_edit_dedup: f64,

    /// Rewrite `http:` image URLs through the image proxy.
    pub proxy_insecure_images: bool,

    /// Also rewrite `https:` image URLs (only with `proxy_insecure_images`).
    pub proxy_secure_images: bool,

    /// Base URL of the image proxy, e.g. `https://proxy.example.com`.
    pub proxy_url_base: String,

    /// Run the external article parser on every new article.
    pub parse_articles: bool,

    /// Path of the article parser executable.
    pub mercury_cli: String,

    pub retrieval_cache_write_interval_secs: u64,

    /// Prefer the parsed body over raw content at read time.
    pub serve_parsed_articles: bool,

    /// Read articles older than this many days are deleted. 0 disables GC.
    pub read_article_retention_days: u64,

    pub gc_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("feedpump.db"),
            sanitize_html: false,
            normalize_favicons: true,
            strict_dedup: true,
            max_edit_dedup: 0.1,
            proxy_insecure_images: false,
            proxy_secure_images: false,
            proxy_url_base: String::new(),
            parse_articles: false,
            mercury_cli: String::new(),
            retrieval_cache_write_interval_secs: 300,
            serve_parsed_articles: false,
            read_article_retention_days: 0,
            gc_interval_secs: 3600,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 14] = [
        "database_path",
        "sanitize_html",
        "normalize_favicons",
        "strict_dedup",
        "max_edit_dedup",
        "proxy_insecure_images",
        "proxy_secure_images",
        "proxy_url_base",
        "parse_articles",
        "mercury_cli",
        "retrieval_cache_write_interval_secs",
        "serve_parsed_articles",
        "read_article_retention_days",
        "gc_interval_secs",
    ];

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.max_edit_dedup) {
            return Err(ConfigError::Invalid {
                key: "max_edit_dedup",
                reason: format!("{} is not within [0, 1]", self.max_edit_dedup),
            });
        }
        if self.retrieval_cache_write_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "retrieval_cache_write_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.parse_articles && self.mercury_cli.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "mercury_cli",
                reason: "required when parse_articles is enabled".to_string(),
            });
        }
        if self.read_article_retention_days > 0 && self.gc_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "gc_interval_secs",
                reason: "must be greater than zero when GC is enabled".to_string(),
            });
        }
        Ok(())
    }

    pub fn retrieval_cache_write_interval(&self) -> Duration {
        Duration::from_secs(self.retrieval_cache_write_interval_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, PathBuf::from("feedpump.db"));
        assert!(!config.sanitize_html);
        assert!(config.normalize_favicons);
        assert!(config.strict_dedup);
        assert_eq!(config.max_edit_dedup, 0.1);
        assert!(!config.proxy_insecure_images);
        assert_eq!(config.retrieval_cache_write_interval(), Duration::from_secs(300));
        assert_eq!(config.read_article_retention_days, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedpump_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert!(config.strict_dedup);
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        let config = Config::from_toml("   \n  \n  ").unwrap();
        assert_eq!(config.gc_interval_secs, 3600);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::from_toml(
            r#"
proxy_insecure_images = true
proxy_url_base = "https://proxy.example.com"
"#,
        )
        .unwrap();
        assert!(config.proxy_insecure_images);
        assert_eq!(config.proxy_url_base, "https://proxy.example.com");
        assert!(!config.proxy_secure_images);
        assert!(config.normalize_favicons);
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("feedpump_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feedpump.toml");
        std::fs::write(
            &path,
            r#"
database_path = "/var/lib/feedpump/feeds.db"
strict_dedup = false
max_edit_dedup = 0.25
parse_articles = true
mercury_cli = "/usr/local/bin/mercury-parser"
retrieval_cache_write_interval_secs = 60
read_article_retention_days = 30
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/feedpump/feeds.db")
        );
        assert!(!config.strict_dedup);
        assert_eq!(config.max_edit_dedup, 0.25);
        assert!(config.parse_articles);
        assert_eq!(config.retrieval_cache_write_interval(), Duration::from_secs(60));
        assert_eq!(config.read_article_retention_days, 30);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::from_toml("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml("strict_dedup = false\ntotally_fake_key = 1\n").unwrap();
        assert!(!config.strict_dedup);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::from_toml("sanitize_html = \"yes\"\n").is_err());
    }

    #[test]
    fn test_max_edit_out_of_range_rejected() {
        let err = Config::from_toml("max_edit_dedup = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "max_edit_dedup", .. }));
    }

    #[test]
    fn test_zero_cache_interval_rejected() {
        let err = Config::from_toml("retrieval_cache_write_interval_secs = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "retrieval_cache_write_interval_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_articles_requires_cli() {
        let err = Config::from_toml("parse_articles = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "mercury_cli", .. }));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedpump_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feedpump.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
