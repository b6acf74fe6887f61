use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{Favicon, Feed, FeedDbRow};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe a user to a feed inside one of its folders, returning the feed ID.
    ///
    /// Re-subscribing to the same URL moves the feed and updates its title.
    pub async fn create_feed(
        &self,
        user_id: &str,
        folder_id: i64,
        url: &str,
        title: &str,
    ) -> Result<i64> {
        let owned: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM folders WHERE id = ? AND user_id = ?")
                .bind(folder_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        if owned.is_none() {
            bail!("Folder {folder_id} does not exist for user");
        }

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (user_id, folder_id, url, title)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, url) DO UPDATE SET
                folder_id = excluded.folder_id,
                title = excluded.title
            RETURNING id
        "#,
        )
        .bind(user_id)
        .bind(folder_id)
        .bind(url)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// All feeds of a user, ordered by ID.
    pub async fn get_feeds(&self, user_id: &str) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedDbRow>(
            r#"
            SELECT id, folder_id, title, description, url, link, latest
            FROM feeds
            WHERE user_id = ?
            ORDER BY id
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    pub async fn get_feed(&self, user_id: &str, feed_id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedDbRow>(
            r#"
            SELECT id, folder_id, title, description, url, link, latest
            FROM feeds
            WHERE user_id = ? AND id = ?
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Store refreshed title, description and homepage link.
    pub async fn update_feed_metadata(&self, user_id: &str, feed: &Feed) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET title = ?, description = ?, link = ? WHERE user_id = ? AND id = ?",
        )
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(&feed.link)
        .bind(user_id)
        .bind(feed.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_feed_favicon(
        &self,
        user_id: &str,
        feed_id: i64,
        favicon: &Favicon,
    ) -> Result<()> {
        sqlx::query("UPDATE feeds SET favicon_mime = ?, favicon = ? WHERE user_id = ? AND id = ?")
            .bind(&favicon.mime)
            .bind(&favicon.data)
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_favicon(&self, user_id: &str, feed_id: i64) -> Result<Option<Favicon>> {
        let row: Option<(Option<String>, Option<Vec<u8>>)> =
            sqlx::query_as("SELECT favicon_mime, favicon FROM feeds WHERE user_id = ? AND id = ?")
                .bind(user_id)
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match row {
            Some((Some(mime), Some(data))) => Some(Favicon { mime, data }),
            _ => None,
        })
    }

    /// Advance the feed's `latest` timestamp, returns whether it moved.
    ///
    /// The `latest < ?` guard keeps the stored value monotone even when two
    /// writers race.
    pub async fn update_feed_latest(
        &self,
        user_id: &str,
        feed_id: i64,
        latest: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE feeds SET latest = ?
            WHERE user_id = ? AND id = ? AND (latest IS NULL OR latest < ?)
        "#,
        )
        .bind(latest.timestamp())
        .bind(user_id)
        .bind(feed_id)
        .bind(latest.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
