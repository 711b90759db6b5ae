//! Work handle: a claimed item plus the lease that protects it.

use chrono::{DateTime, Utc};

/// A claimed work item. Consumed by the queue's `process`.
///
/// Dropping an unconsumed handle (a tick abandoned mid-flight) only logs:
/// the row's lease expires on its own and the row becomes due again.
pub struct WorkHandle<T: Send + Sync> {
    item: Option<T>,
    key: String,
    lease_until: DateTime<Utc>,
}

impl<T: Send + Sync> WorkHandle<T> {
    pub(crate) fn new(item: T, key: String, lease_until: DateTime<Utc>) -> Self {
        Self {
            item: Some(item),
            key,
            lease_until,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lease_until(&self) -> DateTime<Utc> {
        self.lease_until
    }

    pub fn item(&self) -> Option<&T> {
        self.item.as_ref()
    }

    /// Take the item out, marking the handle consumed.
    pub(crate) fn consume(mut self) -> Option<T> {
        self.item.take()
    }
}

impl<T: Send + Sync> Drop for WorkHandle<T> {
    fn drop(&mut self) {
        if self.item.is_some() {
            tracing::warn!(
                "Claim on {} dropped unprocessed; lease expires at {}",
                self.key,
                self.lease_until.to_rfc3339()
            );
        }
    }
}
