//! User operations for the repository.

use crate::domain::{User, UserId};
use crate::repository::new_user_id;
use sqlx::Row;

use super::Repository;

impl Repository {
    /// All users ordered by id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn fetch_users(&self) -> Result<Vec<User>, sqlx::Error> {
        let rows = sqlx::query("SELECT id, name FROM users ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| User {
                id: UserId::new(row.get::<String, _>("id")),
                name: row.get::<String, _>("name"),
            })
            .collect())
    }

    /// Register a user under a fresh id.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn register_user(&self, name: &str) -> Result<User, sqlx::Error> {
        let user = User {
            id: new_user_id(),
            name: name.to_string(),
        };
        self.insert_user(&user).await?;
        Ok(user)
    }

    /// Insert a user with a caller-chosen id, ignoring duplicates.
    ///
    /// Returns true if the user was newly inserted.
    pub async fn insert_user(&self, user: &User) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, name) VALUES (?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(user.id.as_str())
        .bind(user.name.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
