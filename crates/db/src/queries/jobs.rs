// crates/db/src/queries/jobs.rs
// Download job CRUD and the `JobStore` implementation.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use mediaferry_core::{
    Job, JobError, JobId, JobResult, JobStatus, JobStore, OwnerId, OwnerScope, StateUpdate,
};

use super::row_types::JobRow;
use crate::{Database, DbResult};

/// Error recorded on jobs found `running` at startup.
pub const INTERRUPTED_MESSAGE: &str = "Server restart interrupted job";

const JOB_COLUMNS: &str =
    "j.id, j.owner_id, j.target, j.status, j.progress, j.error, j.created_at";

impl Database {
    /// Create a pending job. Returns the stored row.
    pub async fn insert_job(&self, owner: OwnerId, target: &str) -> DbResult<Job> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO download_jobs (owner_id, target, status, progress, created_at)
            VALUES (?1, ?2, 'pending', 0, ?3)
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(target)
        .bind(&created_at)
        .fetch_one(self.pool())
        .await?;

        self.get_job(row.0)
            .await?
            .ok_or(crate::DbError::Sqlx(sqlx::Error::RowNotFound))
    }

    /// Guarded state write: applied only when the stored status admits
    /// `update.status`. Returns whether a row changed.
    pub async fn update_job_state(&self, id: JobId, update: &StateUpdate) -> DbResult<bool> {
        let predecessors = update.status.predecessors();
        if predecessors.is_empty() {
            return Ok(false);
        }
        let placeholders: Vec<String> = (0..predecessors.len())
            .map(|i| format!("?{}", i + 5))
            .collect();
        // SET expressions see the pre-update row, so `status` below is the old status.
        let sql = format!(
            r#"
            UPDATE download_jobs SET
                status = ?1,
                progress = CASE
                    WHEN ?2 IS NULL THEN progress
                    WHEN status = 'running' AND ?1 = 'running' THEN MAX(progress, ?2)
                    ELSE ?2
                END,
                error = COALESCE(?3, error)
            WHERE id = ?4 AND status IN ({})
            "#,
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql)
            .bind(update.status.as_str())
            .bind(update.progress)
            .bind(update.error.as_deref())
            .bind(id);
        for status in &predecessors {
            query = query.bind(status.as_str());
        }
        let result = query.execute(self.pool()).await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_job(&self, id: JobId) -> DbResult<Option<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS}, NULL AS owner_name FROM download_jobs j WHERE j.id = ?1"
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Jobs newest first. The all-owners listing joins the owner's username.
    pub async fn list_jobs(&self, scope: OwnerScope) -> DbResult<Vec<Job>> {
        let rows: Vec<JobRow> = match scope {
            OwnerScope::All => {
                let sql = format!(
                    r#"
                    SELECT {JOB_COLUMNS}, u.username AS owner_name
                    FROM download_jobs j
                    LEFT JOIN users u ON u.id = j.owner_id
                    ORDER BY j.created_at DESC, j.id DESC
                    "#
                );
                sqlx::query_as(&sql).fetch_all(self.pool()).await?
            }
            OwnerScope::Owner(owner) => {
                let sql = format!(
                    r#"
                    SELECT {JOB_COLUMNS}, NULL AS owner_name
                    FROM download_jobs j
                    WHERE j.owner_id = ?1
                    ORDER BY j.created_at DESC, j.id DESC
                    "#
                );
                sqlx::query_as(&sql)
                    .bind(owner)
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Delete a job unless it is running.
    pub async fn delete_job(&self, id: JobId) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM download_jobs WHERE id = ?1 AND status != ?2")
            .bind(id)
            .bind(JobStatus::Running.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Fail jobs left `running` by a previous process. Their downloader died
    /// with it, so nothing would ever finish them.
    pub async fn recover_interrupted_jobs(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE download_jobs SET status = ?1, error = ?2 WHERE status = ?3",
        )
        .bind(JobStatus::Error.as_str())
        .bind(INTERRUPTED_MESSAGE)
        .bind(JobStatus::Running.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobStore for Database {
    async fn insert(&self, owner: OwnerId, target: &str) -> JobResult<Job> {
        self.insert_job(owner, target).await.map_err(JobError::store)
    }

    async fn update_state(&self, id: JobId, update: StateUpdate) -> JobResult<bool> {
        self.update_job_state(id, &update)
            .await
            .map_err(JobError::store)
    }

    async fn get(&self, id: JobId) -> JobResult<Option<Job>> {
        self.get_job(id).await.map_err(JobError::store)
    }

    async fn list(&self, scope: OwnerScope) -> JobResult<Vec<Job>> {
        self.list_jobs(scope).await.map_err(JobError::store)
    }

    async fn delete(&self, id: JobId) -> JobResult<bool> {
        self.delete_job(id).await.map_err(JobError::store)
    }

    async fn owner_folder(&self, owner: OwnerId) -> JobResult<Option<String>> {
        let user = self.get_user(owner).await.map_err(JobError::store)?;
        Ok(user.map(|u| u.folder).filter(|folder| !folder.is_empty()))
    }
}
