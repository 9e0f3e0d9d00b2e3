// crates/core/src/error.rs
use serde::Serialize;
use thiserror::Error;

use crate::job::{JobId, OwnerId};

/// Errors surfaced by job orchestration.
///
/// `Validation`, `NotFound` and `Forbidden` are reported synchronously to the
/// caller. `ProcessStart` and `ProcessExit` never reach the submitter: they are
/// recorded on the job as `error` state and observed via store or progress
/// stream.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("User {requester} may not act on job {job_id}")]
    Forbidden { job_id: JobId, requester: OwnerId },

    #[error("{0}")]
    ProcessStart(String),

    #[error("{}", exit_message(.code))]
    ProcessExit { code: Option<i32> },

    #[error("Job store error: {0}")]
    Store(String),
}

fn exit_message(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("Process exited with code {code}"),
        None => "Process terminated by signal".to_string(),
    }
}

/// Machine-readable kind of a runtime job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SpawnFailed,
    NonZeroExit,
}

impl JobError {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            JobError::ProcessStart(_) => Some(FailureKind::SpawnFailed),
            JobError::ProcessExit { .. } => Some(FailureKind::NonZeroExit),
            _ => None,
        }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        JobError::Store(err.to_string())
    }
}

pub type JobResult<T> = Result<T, JobError>;
