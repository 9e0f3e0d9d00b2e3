// crates/core/src/store.rs
//! Persistence contract the orchestration core needs.

use async_trait::async_trait;

use crate::error::JobResult;
use crate::job::{Job, JobId, OwnerId, OwnerScope, StateUpdate};

/// Durable job records.
///
/// Implementations must be safe to call concurrently for different jobs.
/// Every `update_state` is a guarded transition: it is applied only when the
/// stored status admits `update.status` (see `JobStatus::can_transition_to`),
/// so a terminal job is never overwritten.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in state `pending` with progress 0.
    async fn insert(&self, owner: OwnerId, target: &str) -> JobResult<Job>;

    /// Apply `update` if the transition is legal. Returns false when the job is
    /// missing or its current status does not admit the transition.
    ///
    /// A progress update never lowers the stored progress.
    async fn update_state(&self, id: JobId, update: StateUpdate) -> JobResult<bool>;

    async fn get(&self, id: JobId) -> JobResult<Option<Job>>;

    /// Jobs in `scope`, newest first. `OwnerScope::All` fills `owner_name`.
    async fn list(&self, scope: OwnerScope) -> JobResult<Vec<Job>>;

    /// Remove a job unless it is `running`. Returns false when nothing was deleted.
    async fn delete(&self, id: JobId) -> JobResult<bool>;

    /// Per-owner output subfolder, if the owner has one.
    async fn owner_folder(&self, _owner: OwnerId) -> JobResult<Option<String>> {
        Ok(None)
    }
}
