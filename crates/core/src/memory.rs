// crates/core/src/memory.rs
//! In-memory `JobStore` with the same transition rules as the SQLite store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobStatus, OwnerId, OwnerScope, StateUpdate};
use crate::store::JobStore;

#[derive(Default)]
struct Inner {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
    owners: HashMap<OwnerId, (String, String)>,
    writes: HashMap<JobId, usize>,
}

/// Non-durable store, used by tests and embedders that need no persistence.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an owner's display name and output folder.
    pub fn add_owner(&self, id: OwnerId, username: impl Into<String>, folder: impl Into<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.owners.insert(id, (username.into(), folder.into()));
        }
    }

    /// Number of accepted `update_state` writes for `id`.
    pub fn write_count(&self, id: JobId) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.writes.get(&id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn lock(&self) -> JobResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| JobError::store(format!("memory store poisoned: {e}")))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, owner: OwnerId, target: &str) -> JobResult<Job> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let job = Job {
            id: inner.next_id,
            owner_id: owner,
            owner_name: None,
            target: target.to_string(),
            status: JobStatus::Pending,
            progress: 0.0,
            error: None,
            created_at: Utc::now(),
        };
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_state(&self, id: JobId, update: StateUpdate) -> JobResult<bool> {
        let mut inner = self.lock()?;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.status.can_transition_to(update.status) {
            return Ok(false);
        }
        let stays_running = job.status == JobStatus::Running && update.status == JobStatus::Running;
        job.status = update.status;
        if let Some(progress) = update.progress {
            job.progress = if stays_running {
                job.progress.max(progress)
            } else {
                progress
            };
        }
        if update.error.is_some() {
            job.error = update.error;
        }
        *inner.writes.entry(id).or_default() += 1;
        Ok(true)
    }

    async fn get(&self, id: JobId) -> JobResult<Option<Job>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn list(&self, scope: OwnerScope) -> JobResult<Vec<Job>> {
        let inner = self.lock()?;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| match scope {
                OwnerScope::All => true,
                OwnerScope::Owner(owner) => job.owner_id == owner,
            })
            .cloned()
            .map(|mut job| {
                if scope == OwnerScope::All {
                    job.owner_name = inner.owners.get(&job.owner_id).map(|(name, _)| name.clone());
                }
                job
            })
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn delete(&self, id: JobId) -> JobResult<bool> {
        let mut inner = self.lock()?;
        match inner.jobs.get(&id) {
            Some(job) if job.status != JobStatus::Running => {
                inner.jobs.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn owner_folder(&self, owner: OwnerId) -> JobResult<Option<String>> {
        Ok(self
            .lock()?
            .owners
            .get(&owner)
            .map(|(_, folder)| folder.clone())
            .filter(|folder| !folder.is_empty()))
    }
}
