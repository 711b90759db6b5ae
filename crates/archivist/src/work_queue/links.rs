//! Queue of due links.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{lease_until, WorkHandle, WorkQueue, WorkQueueError};
use crate::lifecycle::{LinkMachine, Transition};
use crate::models::Link;
use crate::repository::ArchiveStore;

pub struct LinkQueue {
    store: Arc<dyn ArchiveStore>,
    machine: LinkMachine,
    budget: Duration,
}

impl LinkQueue {
    pub fn new(store: Arc<dyn ArchiveStore>, machine: LinkMachine, budget: Duration) -> Self {
        Self {
            store,
            machine,
            budget,
        }
    }
}

#[async_trait]
impl WorkQueue for LinkQueue {
    type Item = Link;

    fn name(&self) -> &'static str {
        "links"
    }

    fn key(&self, item: &Link) -> String {
        item.id.to_string()
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Link>, WorkQueueError> {
        Ok(self.store.due_links(now, limit).await?)
    }

    fn tick_budget(&self, _item: &Link) -> Duration {
        self.budget
    }

    async fn claim(&self, item: Link, now: DateTime<Utc>) -> Result<WorkHandle<Link>, WorkQueueError> {
        let lease = lease_until(now, self.budget);
        if !self.store.claim_link(&item.id, item.status, now, lease).await? {
            return Err(WorkQueueError::ClaimLost);
        }
        let key = self.key(&item);
        Ok(WorkHandle::new(item, key, lease))
    }

    async fn process(&self, handle: WorkHandle<Link>) -> Result<(), WorkQueueError> {
        let key = handle.key().to_string();
        let link = handle
            .consume()
            .ok_or_else(|| WorkQueueError::NotFound(key.clone()))?;
        match self.machine.tick(link).await? {
            Transition::Lost => {
                debug!("Link {} changed under its claim", key);
                Err(WorkQueueError::ClaimLost)
            }
            _ => Ok(()),
        }
    }

    async fn pending(&self) -> Result<usize, WorkQueueError> {
        Ok(self.store.pending_counts().await?.0)
    }
}
