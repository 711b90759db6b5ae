//! Persistence for links, jobs and their history.
//!
//! [`ArchiveStore`] is the seam between the state machines and storage.
//! Every write that changes a row's state is conditional on the status the
//! writer last observed, so two workers racing on one row cannot both win.

mod diesel_store;
mod memory;
pub mod migrations;
pub mod pool;
mod records;
#[cfg(test)]
pub(crate) mod test_support;
pub mod util;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::abid::Abid;
use crate::models::{HistoryEntry, HistoryRecord, Job, JobStatus, Link, LinkStatus};

pub use diesel_store::DieselStore;
pub use memory::MemoryStore;
pub use migrations::run_migrations;
pub use pool::SqlitePool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("migration error: {0}")]
    Migration(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operations the engine needs.
///
/// Claims and updates return `false` when the row no longer matches what
/// the caller expected; callers treat that as "someone else got there first".
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Insert a link unless one with the same URL exists.
    async fn insert_link(&self, link: &Link) -> StoreResult<bool>;

    async fn get_link(&self, id: &Abid) -> StoreResult<Option<Link>>;

    async fn find_link_by_url(&self, url: &str) -> StoreResult<Option<Link>>;

    /// Links newest first, optionally filtered by status.
    async fn list_links(&self, status: Option<LinkStatus>, limit: usize)
        -> StoreResult<Vec<Link>>;

    /// Links whose `retry_at` has passed, oldest first.
    async fn due_links(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Link>>;

    /// Take a lease on a due link by pushing its `retry_at` to `lease_until`.
    async fn claim_link(
        &self,
        id: &Abid,
        expected: LinkStatus,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Write a link's state columns (`status`, `retry_at`, `end_ts`, `options`)
    /// if its status is still `expected`.
    async fn update_link(&self, link: &Link, expected: LinkStatus) -> StoreResult<bool>;

    /// Write the user-editable columns (`title`, `tags`) unconditionally.
    async fn update_link_metadata(&self, link: &Link) -> StoreResult<()>;

    /// Make a non-sealed link due now.
    async fn touch_link(&self, id: &Abid, now: DateTime<Utc>) -> StoreResult<()>;

    /// Insert a job unless one already exists for (link, extractor).
    async fn insert_job(&self, job: &Job) -> StoreResult<bool>;

    async fn get_job(&self, id: &Abid) -> StoreResult<Option<Job>>;

    async fn jobs_for_link(&self, link_id: &Abid) -> StoreResult<Vec<Job>>;

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>>;

    async fn claim_job(
        &self,
        id: &Abid,
        expected: JobStatus,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Write every mutable job column if its status is still `expected`.
    async fn update_job(&self, job: &Job, expected: JobStatus) -> StoreResult<bool>;

    async fn append_history(
        &self,
        link_id: &Abid,
        extractor: &str,
        entry: &HistoryEntry,
    ) -> StoreResult<()>;

    /// History for a link in append order, optionally for one extractor.
    async fn history(
        &self,
        link_id: &Abid,
        extractor: Option<&str>,
    ) -> StoreResult<Vec<HistoryRecord>>;

    async fn set_latest(
        &self,
        link_id: &Abid,
        extractor: &str,
        output: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Newest successful output per extractor.
    async fn latest(&self, link_id: &Abid) -> StoreResult<BTreeMap<String, String>>;

    /// Number of (non-sealed links, non-terminal jobs).
    async fn pending_counts(&self) -> StoreResult<(usize, usize)>;
}
