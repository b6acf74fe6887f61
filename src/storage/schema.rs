use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the durable store shared by every feed loop.
///
/// Cloning is cheap (the pool is reference counted) and the pool serializes
/// its own connections, so the handle is passed by value into spawned tasks.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be applied.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);
        let in_memory = path == ":memory:";

        // busy_timeout=5000: concurrent feed loops write to the same file, so
        // give SQLite 5 seconds to wait on a held write lock before failing.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // A shared-cache in-memory database reports table locks instead of
        // waiting on them, so tests run on a single connection.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                api_key TEXT UNIQUE NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // parent_id NULL marks the per-user root folder
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                parent_id INTEGER REFERENCES folders(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL,
                link TEXT NOT NULL DEFAULT '',
                latest INTEGER,
                favicon_mime TEXT,
                favicon BLOB,
                UNIQUE(user_id, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                folder_id INTEGER NOT NULL,
                hash TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                parsed TEXT,
                link TEXT NOT NULL DEFAULT '',
                read INTEGER NOT NULL DEFAULT 0,
                date INTEGER NOT NULL,
                retrieved INTEGER NOT NULL,
                synthetic_date INTEGER NOT NULL DEFAULT 0,
                UNIQUE(user_id, feed_id, hash)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_user_feed ON articles(user_id, feed_id)",
        )
        .execute(&mut *tx)
        .await?;

        // Covers the read-article GC sweep: WHERE read = 1 AND retrieved < ?
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_read_retrieved ON articles(read, retrieved)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mute_words (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                word TEXT NOT NULL,
                PRIMARY KEY (user_id, word)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS unmute_feeds (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, feed_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Opaque per-user retrieval cache blobs (base64 text)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS retrieval_cache (
                user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                data TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

/// Per-call deadline for storage operations issued by the fetch subsystem.
pub const STORAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a storage future under [`STORAGE_TIMEOUT`].
pub async fn timed<T, F>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(STORAGE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("storage call exceeded {}s deadline", STORAGE_TIMEOUT.as_secs()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_migrates() {
        let db = Database::open(":memory:").await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&db.pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in [
            "articles",
            "feeds",
            "folders",
            "mute_words",
            "retrieval_cache",
            "unmute_feeds",
            "users",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_passes_through_result() {
        let value = timed(async { Ok::<_, anyhow::Error>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_expires() {
        let result: Result<()> = timed(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("deadline"));
    }
}
