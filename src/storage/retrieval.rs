use anyhow::Result;
use std::collections::HashMap;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Retrieval Cache Persistence
    // ========================================================================

    /// Every stored retrieval-cache blob, keyed by user ID.
    pub async fn get_retrieval_cache(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT user_id, data FROM retrieval_cache")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    /// Upsert all blobs in a single transaction.
    pub async fn persist_retrieval_cache(&self, blobs: &HashMap<String, String>) -> Result<()> {
        if blobs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (user_id, data) in blobs {
            sqlx::query(
                r#"
                INSERT INTO retrieval_cache (user_id, data) VALUES (?, ?)
                ON CONFLICT(user_id) DO UPDATE SET data = excluded.data
            "#,
            )
            .bind(user_id)
            .bind(data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
