// crates/core/src/job.rs
//! Download job model: identity, status graph, and the progress event
//! projection that is pushed to live observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a download job (SQLite rowid).
pub type JobId = i64;

/// Identifier of the user that owns a job.
pub type OwnerId = i64;

/// Lifecycle state of a download job.
///
/// `Pending` and `Running` are the only non-terminal states. The graph is
/// one-directional: `pending -> running -> {done | error | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Error,
        JobStatus::Cancelled,
    ];

    /// Stable string stored in the `status` column and sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_str(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true when the job cannot transition any further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    /// Whether a store write moving `self` to `next` is legal.
    ///
    /// `running -> running` is allowed (progress updates).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Running)
                | (Self::Running, Self::Done)
                | (Self::Running, Self::Error)
                | (Self::Running, Self::Cancelled)
        )
    }

    /// States from which a write to `self` is accepted.
    pub fn predecessors(self) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(self))
            .collect()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted download job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    /// Owner username; only populated on admin listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    /// Opaque download target, usually a URL.
    pub target: String,
    pub status: JobStatus,
    /// 0-100. Meaningful only while `running` and when `done`.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Whether `requester` may read or cancel this job.
    pub fn is_visible_to(&self, requester: &Requester) -> bool {
        requester.is_admin || requester.id == self.owner_id
    }
}

/// Transient projection of a job's mutable fields, pushed to observers.
///
/// Wire shape: `{id, status, progress, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn running(id: JobId, progress: f64) -> Self {
        Self {
            id,
            status: JobStatus::Running,
            progress,
            error: None,
        }
    }

    pub fn done(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Done,
            progress: 100.0,
            error: None,
        }
    }

    pub fn error(id: JobId, progress: f64, message: impl Into<String>) -> Self {
        Self {
            id,
            status: JobStatus::Error,
            progress,
            error: Some(message.into()),
        }
    }

    pub fn cancelled(id: JobId, progress: f64) -> Self {
        Self {
            id,
            status: JobStatus::Cancelled,
            progress,
            error: None,
        }
    }

    /// Synthetic event reflecting the stored state of `job`.
    pub fn snapshot(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial update applied by `JobStore::update_state`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub error: Option<String>,
}

impl StateUpdate {
    pub fn running(progress: f64) -> Self {
        Self {
            status: JobStatus::Running,
            progress: Some(progress),
            error: None,
        }
    }

    /// Progress-only update; the job stays `running`.
    pub fn progress(progress: f64) -> Self {
        Self::running(progress)
    }

    pub fn done() -> Self {
        Self {
            status: JobStatus::Done,
            progress: Some(100.0),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            progress: None,
            error: Some(message.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            progress: None,
            error: None,
        }
    }
}

/// Which jobs a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerScope {
    All,
    Owner(OwnerId),
}

/// Identity of the caller acting on jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    pub id: OwnerId,
    pub is_admin: bool,
}

impl Requester {
    pub fn user(id: OwnerId) -> Self {
        Self { id, is_admin: false }
    }

    pub fn admin(id: OwnerId) -> Self {
        Self { id, is_admin: true }
    }

    pub fn scope(&self) -> OwnerScope {
        if self.is_admin {
            OwnerScope::All
        } else {
            OwnerScope::Owner(self.id)
        }
    }
}
