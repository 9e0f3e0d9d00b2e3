// crates/server/src/jobs/mod.rs
//! Download job orchestration.
//!
//! Provides:
//! - `ProgressBus` — per-job fan-out of progress events to live observers
//! - `JobRunner` — executes one job's downloader process
//! - `JobCoordinator` — submit, cancel, list and subscribe entry points

pub mod bus;
pub mod coordinator;
pub mod runner;

pub use bus::{ProgressBus, Subscription};
pub use coordinator::{CancelOutcome, CoordinatorOptions, JobCoordinator};
pub use runner::{JobRunner, RunOutcome};
