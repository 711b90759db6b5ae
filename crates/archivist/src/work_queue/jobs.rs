//! Queue of due jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{lease_until, WorkHandle, WorkQueue, WorkQueueError};
use crate::lifecycle::{JobMachine, Transition};
use crate::models::Job;
use crate::repository::ArchiveStore;

pub struct JobQueue {
    store: Arc<dyn ArchiveStore>,
    machine: JobMachine,
}

impl JobQueue {
    pub fn new(store: Arc<dyn ArchiveStore>, machine: JobMachine) -> Self {
        Self { store, machine }
    }
}

#[async_trait]
impl WorkQueue for JobQueue {
    type Item = Job;

    fn name(&self) -> &'static str {
        "jobs"
    }

    fn key(&self, item: &Job) -> String {
        item.id.to_string()
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, WorkQueueError> {
        Ok(self.store.due_jobs(now, limit).await?)
    }

    fn tick_budget(&self, item: &Job) -> Duration {
        self.machine.lease_for(item)
    }

    async fn claim(&self, item: Job, now: DateTime<Utc>) -> Result<WorkHandle<Job>, WorkQueueError> {
        let lease = lease_until(now, self.tick_budget(&item));
        if !self.store.claim_job(&item.id, item.status, now, lease).await? {
            return Err(WorkQueueError::ClaimLost);
        }
        let key = self.key(&item);
        Ok(WorkHandle::new(item, key, lease))
    }

    async fn process(&self, handle: WorkHandle<Job>) -> Result<(), WorkQueueError> {
        let key = handle.key().to_string();
        let job = handle
            .consume()
            .ok_or_else(|| WorkQueueError::NotFound(key.clone()))?;
        match self.machine.tick(job).await? {
            Transition::Lost => {
                debug!("Job {} changed under its claim", key);
                Err(WorkQueueError::ClaimLost)
            }
            _ => Ok(()),
        }
    }

    async fn pending(&self) -> Result<usize, WorkQueueError> {
        Ok(self.store.pending_counts().await?.1)
    }
}
