//! Data models for archived links, extractor jobs and their history.

mod history;
mod job;
mod link;

pub use history::{HistoryEntry, HistoryRecord, HistoryStatus};
pub use job::{backoff_delay, Job, JobStatus};
pub use link::{ArchiveOptions, Link, LinkStatus};

use std::time::Duration;

/// Convert a std duration for timestamp arithmetic, saturating on overflow.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}
