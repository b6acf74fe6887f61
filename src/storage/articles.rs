use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Article, ArticleDbRow};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles loaded for duplicate checking (OOM protection)
const MAX_ARTICLES: i64 = 5000;

/// Chunk size for `IN (...)` lists, well under SQLite's 999 parameter limit
const DELETE_BATCH_SIZE: usize = 500;

impl Database {
    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Insert an article for a user, returns whether a row was written.
    ///
    /// Idempotent on `(user, feed, fingerprint)`: a conflicting insert is a
    /// no-op and returns `false`.
    pub async fn insert_article(&self, user_id: &str, article: &Article) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO articles (
                user_id, feed_id, folder_id, hash, title, summary, content, parsed,
                link, read, date, retrieved, synthetic_date
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, feed_id, hash) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(article.feed_id)
        .bind(article.folder_id)
        .bind(article.hash())
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&article.content)
        .bind(&article.parsed)
        .bind(&article.link)
        .bind(article.read)
        .bind(article.date.timestamp())
        .bind(article.retrieved.timestamp())
        .bind(article.synthetic_date)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a user's articles by ID, returns the number of rows removed.
    pub async fn delete_articles(&self, user_id: &str, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;

        for chunk in ids.chunks(DELETE_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM articles WHERE user_id = ");
            builder.push_bind(user_id);
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            deleted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    /// Mark article as read (idempotent), returns whether it was changed
    pub async fn mark_article_read(&self, user_id: &str, article_id: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE articles SET read = 1 WHERE user_id = ? AND id = ? AND read = 0")
                .bind(user_id)
                .bind(article_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove read articles retrieved before `cutoff`, across all users.
    pub async fn delete_read_articles_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM articles WHERE read = 1 AND retrieved < ?")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// A user's articles for one feed, newest first.
    pub async fn get_articles_for_feed(&self, user_id: &str, feed_id: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT id, feed_id, folder_id, title, summary, content, parsed, link,
                   read, date, retrieved, synthetic_date
            FROM articles
            WHERE user_id = ? AND feed_id = ?
            ORDER BY date DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    pub async fn get_article(&self, user_id: &str, article_id: i64) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT id, feed_id, folder_id, title, summary, content, parsed, link,
                   read, date, retrieved, synthetic_date
            FROM articles
            WHERE user_id = ? AND id = ?
        "#,
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ArticleDbRow::into_article))
    }
}
