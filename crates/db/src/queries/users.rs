//! Owner lookups. User management lives outside this crate; these queries only
//! read what job orchestration needs (display name, output folder) and seed rows.

use crate::{Database, DbResult};
use mediaferry_core::OwnerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: OwnerId,
    pub username: String,
    pub folder: String,
    pub is_admin: bool,
}

impl Database {
    /// Insert or replace an owner row.
    pub async fn create_user(
        &self,
        id: OwnerId,
        username: &str,
        folder: &str,
        is_admin: bool,
    ) -> DbResult<UserRow> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, folder, is_admin) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                folder = excluded.folder,
                is_admin = excluded.is_admin
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(folder)
        .bind(is_admin)
        .execute(self.pool())
        .await?;
        Ok(UserRow {
            id,
            username: username.to_string(),
            folder: folder.to_string(),
            is_admin,
        })
    }

    pub async fn get_user(&self, id: OwnerId) -> DbResult<Option<UserRow>> {
        let row: Option<(i64, String, String, bool)> =
            sqlx::query_as("SELECT id, username, folder, is_admin FROM users WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(id, username, folder, is_admin)| UserRow {
            id,
            username,
            folder,
            is_admin,
        }))
    }
}
