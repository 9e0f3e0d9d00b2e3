// crates/core/src/lib.rs
//! Domain types for download job orchestration.

pub mod downloader;
pub mod error;
pub mod job;
pub mod memory;
pub mod progress;
pub mod store;

pub use downloader::*;
pub use error::*;
pub use job::*;
pub use memory::MemoryJobStore;
pub use progress::*;
pub use store::JobStore;
