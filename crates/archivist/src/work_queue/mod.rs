//! Polling work queues over the durable store.
//!
//! The store rows are the queue: each [`WorkQueue`] discovers due rows,
//! claims one by leasing it with a conditional update, and runs one state
//! machine tick on it. [`WorkerPool`] drives a queue with bounded
//! concurrency.

mod error;
mod handle;
mod jobs;
mod links;
pub mod runner;

pub use error::WorkQueueError;
pub use handle::WorkHandle;
pub use jobs::JobQueue;
pub use links::LinkQueue;
pub use runner::{PoolConfig, PoolStats, WorkerPool};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A queue that manages the claim/process lifecycle for due rows.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    /// Short name for logs ("jobs", "links").
    fn name(&self) -> &'static str;

    /// Stable identity of an item, used to avoid dispatching it twice.
    fn key(&self, item: &Self::Item) -> String;

    /// Due items, oldest `retry_at` first.
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Self::Item>, WorkQueueError>;

    /// Wall-clock budget for processing one item.
    fn tick_budget(&self, item: &Self::Item) -> Duration;

    /// Lease the item for this worker.
    ///
    /// Fails with [`WorkQueueError::ClaimLost`] when another worker holds it.
    async fn claim(
        &self,
        item: Self::Item,
        now: DateTime<Utc>,
    ) -> Result<WorkHandle<Self::Item>, WorkQueueError>;

    /// Run one tick on a claimed item.
    async fn process(&self, handle: WorkHandle<Self::Item>) -> Result<(), WorkQueueError>;

    /// Rows not yet terminal, for deciding whether the system is settled.
    async fn pending(&self) -> Result<usize, WorkQueueError>;
}

pub(crate) fn lease_until(now: DateTime<Utc>, budget: Duration) -> DateTime<Utc> {
    now + crate::models::to_chrono(budget)
}
