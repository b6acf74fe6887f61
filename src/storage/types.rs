use chrono::{DateTime, SecondsFormat, Utc};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("Another feedpump instance appears to be using this database.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Reserved name of the per-user root folder.
pub const ROOT_FOLDER_NAME: &str = "<root>";

pub(crate) fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserDbRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub api_key: String,
}

impl UserDbRow {
    pub(crate) fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            password_hash: self.password_hash,
            api_key: self.api_key,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub folder_id: i64,
    pub title: String,
    pub description: String,
    pub url: String,
    pub link: String,
    pub latest: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            folder_id: self.folder_id,
            title: self.title,
            description: self.description,
            url: self.url,
            link: self.link,
            latest: self.latest.map(from_unix),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub folder_id: i64,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub parsed: Option<String>,
    pub link: String,
    pub read: bool,
    pub date: i64,
    pub retrieved: i64,
    pub synthetic_date: bool,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            folder_id: self.folder_id,
            title: self.title,
            summary: self.summary,
            content: self.content,
            parsed: self.parsed,
            link: self.link,
            read: self.read,
            date: from_unix(self.date),
            retrieved: from_unix(self.retrieved),
            synthetic_date: self.synthetic_date,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered user. Created by the admin surface; the fetch subsystem only reads it.
///
/// `password_hash` and `api_key` are masked in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub api_key: String,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    /// `None` only for the root folder
    pub parent_id: Option<i64>,
}

impl Folder {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none() && self.name == ROOT_FOLDER_NAME
    }
}

/// Feed descriptor.
///
/// A feed loop owns its descriptor exclusively: `title`, `description` and
/// `link` change on metadata refresh, `latest` on ingestion of a newer article.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub folder_id: i64,
    pub title: String,
    pub description: String,
    /// Fetch location
    pub url: String,
    /// Homepage
    pub link: String,
    /// Most recent publication time accepted for this feed
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Favicon {
    pub mime: String,
    pub data: Vec<u8>,
}

/// An ingested item owned by a (user, feed).
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub folder_id: i64,
    pub title: String,
    pub summary: String,
    pub content: String,
    /// Enriched body from the external article parser
    pub parsed: Option<String>,
    pub link: String,
    pub read: bool,
    /// Publication time
    pub date: DateTime<Utc>,
    /// Ingestion time
    pub retrieved: DateTime<Utc>,
    /// `date` was substituted because the item carried none
    pub synthetic_date: bool,
}

impl Article {
    /// Content fingerprint: SHA3-256 over the user-visible fields, hex encoded.
    ///
    /// A synthetic date is excluded so re-fetching an undated item yields
    /// the same fingerprint.
    pub fn hash(&self) -> String {
        let mut hasher = Sha3_256::new();
        for field in [
            self.title.as_str(),
            self.summary.as_str(),
            self.content.as_str(),
            self.parsed.as_deref().unwrap_or(""),
            self.link.as_str(),
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        if !self.synthetic_date {
            hasher.update(
                self.date
                    .to_rfc3339_opts(SecondsFormat::Secs, true)
                    .as_bytes(),
            );
        }
        format!("{:x}", hasher.finalize())
    }

    /// Body to serve to readers: the enriched body when requested and available.
    pub fn body(&self, serve_parsed: bool) -> &str {
        match &self.parsed {
            Some(parsed) if serve_parsed && !parsed.is_empty() => parsed,
            _ => &self.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article() -> Article {
        Article {
            id: 0,
            feed_id: 1,
            folder_id: 1,
            title: "Title".to_string(),
            summary: "Summary".to_string(),
            content: "<p>Body</p>".to_string(),
            parsed: None,
            link: "http://ex/a".to_string(),
            read: false,
            date: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            retrieved: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
            synthetic_date: false,
        }
    }

    #[test]
    fn test_hash_is_deterministic_hex() {
        let a = article();
        assert_eq!(a.hash(), a.hash());
        assert_eq!(a.hash().len(), 64);
        assert!(a.hash().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_ignores_id_read_and_retrieved() {
        let a = article();
        let mut b = article();
        b.id = 42;
        b.read = true;
        b.retrieved = Utc::now();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_covers_date_unless_synthetic() {
        let a = article();
        let mut b = article();
        b.date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_ne!(a.hash(), b.hash());

        let mut c = a.clone();
        let mut d = b.clone();
        c.synthetic_date = true;
        d.synthetic_date = true;
        assert_eq!(c.hash(), d.hash());
    }

    #[test]
    fn test_hash_field_boundaries_matter() {
        let mut a = article();
        let mut b = article();
        a.title = "ab".to_string();
        a.summary = "c".to_string();
        b.title = "a".to_string();
        b.summary = "bc".to_string();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_body_prefers_parsed_when_serving_parsed() {
        let mut a = article();
        assert_eq!(a.body(true), "<p>Body</p>");
        a.parsed = Some("<div>Parsed</div>".to_string());
        assert_eq!(a.body(false), "<p>Body</p>");
        assert_eq!(a.body(true), "<div>Parsed</div>");
    }

    #[test]
    fn test_user_debug_masks_secrets() {
        let user = User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            password_hash: "hash-value".to_string(),
            api_key: "key-value".to_string(),
        };
        let debug = format!("{:?}", user);
        assert!(!debug.contains("hash-value"));
        assert!(!debug.contains("key-value"));
        assert!(debug.contains("[REDACTED]"));
    }
}
