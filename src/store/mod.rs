//! Persistent capture log
//!
//! Stores raw analyzer output tagged with the revision and timestamp of the
//! capture cycle that produced it.

pub mod schema;
pub mod sqlite;

pub use schema::{LogEntry, LogKind, RevisionSummary};
pub use sqlite::{LogStore, StoreError};
