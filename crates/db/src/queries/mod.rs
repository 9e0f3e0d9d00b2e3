// crates/db/src/queries/mod.rs
// Download job and owner queries for the mediaferry SQLite database.

pub(crate) mod row_types;
pub(crate) mod jobs;
pub mod users;
