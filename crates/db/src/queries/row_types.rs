// crates/db/src/queries/row_types.rs
// Internal row types mapping SQLite rows onto core domain types.

use crate::{DbError, DbResult};
use chrono::{DateTime, Utc};
use mediaferry_core::{Job, JobStatus};
use sqlx::Row;

#[derive(Debug)]
pub(crate) struct JobRow {
    id: i64,
    owner_id: i64,
    owner_name: Option<String>,
    target: String,
    status: String,
    progress: f64,
    error: Option<String>,
    created_at: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            owner_name: row.try_get("owner_name")?,
            target: row.try_get("target")?,
            status: row.try_get("status")?,
            progress: row.try_get("progress")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl JobRow {
    pub(crate) fn into_job(self) -> DbResult<Job> {
        let status =
            JobStatus::from_db_str(&self.status).ok_or(DbError::InvalidStatus(self.status))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|_| DbError::InvalidTimestamp(self.created_at.clone()))?
            .with_timezone(&Utc);
        Ok(Job {
            id: self.id,
            owner_id: self.owner_id,
            owner_name: self.owner_name,
            target: self.target,
            status,
            progress: self.progress,
            error: self.error,
            created_at,
        })
    }
}
