use anyhow::Result;
use std::collections::HashSet;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Mute Words
    // ========================================================================

    /// A user's mute words, lower-cased.
    pub async fn get_mute_words(&self, user_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT word FROM mute_words WHERE user_id = ? ORDER BY word")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(word,)| word).collect())
    }

    /// Add mute words (trimmed and lower-cased); blanks are ignored.
    pub async fn add_mute_words(&self, user_id: &str, words: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for word in words {
            let word = word.trim().to_lowercase();
            if word.is_empty() {
                continue;
            }
            sqlx::query("INSERT OR IGNORE INTO mute_words (user_id, word) VALUES (?, ?)")
                .bind(user_id)
                .bind(&word)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_mute_words(&self, user_id: &str, words: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for word in words {
            sqlx::query("DELETE FROM mute_words WHERE user_id = ? AND word = ?")
                .bind(user_id)
                .bind(word.trim().to_lowercase())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Unmuted Feeds
    // ========================================================================

    /// Feeds that bypass the user's mute words.
    pub async fn get_unmuted_feeds(&self, user_id: &str) -> Result<HashSet<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT feed_id FROM unmute_feeds WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn add_unmuted_feed(&self, user_id: &str, feed_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO unmute_feeds (user_id, feed_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_unmuted_feed(&self, user_id: &str, feed_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM unmute_feeds WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, User};

    async fn setup() -> (Database, User) {
        let db = Database::open(":memory:").await.unwrap();
        let user = User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            password_hash: "x".to_string(),
            api_key: "k".to_string(),
        };
        db.create_user(&user).await.unwrap();
        (db, user)
    }

    #[tokio::test]
    async fn test_mute_words_are_normalized() {
        let (db, user) = setup().await;
        db.add_mute_words(
            &user.id,
            &[" Politics ".to_string(), "".to_string(), "sports".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(
            db.get_mute_words(&user.id).await.unwrap(),
            vec!["politics".to_string(), "sports".to_string()]
        );
    }

    #[tokio::test]
    async fn test_add_mute_words_twice_keeps_one() {
        let (db, user) = setup().await;
        db.add_mute_words(&user.id, &["politics".to_string()])
            .await
            .unwrap();
        db.add_mute_words(&user.id, &["POLITICS".to_string()])
            .await
            .unwrap();
        assert_eq!(db.get_mute_words(&user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_mute_words() {
        let (db, user) = setup().await;
        db.add_mute_words(&user.id, &["politics".to_string(), "sports".to_string()])
            .await
            .unwrap();
        db.delete_mute_words(&user.id, &["Politics".to_string()])
            .await
            .unwrap();
        assert_eq!(
            db.get_mute_words(&user.id).await.unwrap(),
            vec!["sports".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unmuted_feeds() {
        let (db, user) = setup().await;
        let root = db.get_root_folder(&user.id).await.unwrap();
        let feed = db
            .create_feed(&user.id, root.id, "https://example.com/feed.xml", "")
            .await
            .unwrap();

        db.add_unmuted_feed(&user.id, feed).await.unwrap();
        assert!(db.get_unmuted_feeds(&user.id).await.unwrap().contains(&feed));

        db.delete_unmuted_feed(&user.id, feed).await.unwrap();
        assert!(db.get_unmuted_feeds(&user.id).await.unwrap().is_empty());
    }
}
