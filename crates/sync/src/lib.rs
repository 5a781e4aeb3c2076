//! Keeps the remote index consistent with the local file tree.
//!
//! # Design
//!
//! Change flow: file events (or a full scan) pass the eligibility filter,
//! then a dedup cache, and only then become `index_file` tool calls through
//! the RPC client. Batching and pacing keep the backend from being
//! overwhelmed: a full scan processes fixed-size batches concurrently,
//! sleeps a fixed delay between batches, and backs off for a cooldown when
//! the backend answers with a rate-limit status.
//!
//! Failures never abort a scan; a file that could not be indexed is counted
//! and skipped until its next change event or the next scan.

pub mod eligibility;
pub mod engine;
pub mod watcher;

pub use eligibility::Rejection;
pub use engine::{FileOutcome, ScanSummary, SkipReason, SyncEngine, SyncError};
pub use watcher::{ChangeEvent, WatcherConfig, WatcherError, WatcherTask};
