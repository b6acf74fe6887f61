use anyhow::Result;

use super::schema::Database;
use super::types::{User, UserDbRow, ROOT_FOLDER_NAME};

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Register a user and create its `<root>` folder in one transaction.
    pub async fn create_user(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO users (id, username, password_hash, api_key) VALUES (?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&user.api_key)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO folders (user_id, name, parent_id) VALUES (?, ?, NULL)")
            .bind(&user.id)
            .bind(ROOT_FOLDER_NAME)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// All registered users, ordered by username.
    pub async fn get_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserDbRow>(
            "SELECT id, username, password_hash, api_key FROM users ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserDbRow::into_user).collect())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserDbRow>(
            "SELECT id, username, password_hash, api_key FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserDbRow::into_user))
    }

    pub async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserDbRow>(
            "SELECT id, username, password_hash, api_key FROM users WHERE api_key = ?",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserDbRow::into_user))
    }
}
