//! Store doubles for unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ArchiveStore, MemoryStore, StoreResult};
use crate::abid::Abid;
use crate::models::{HistoryEntry, HistoryRecord, Job, JobStatus, Link, LinkStatus};

/// A [`MemoryStore`] that lets a test slip writes in between the reads and
/// writes of the code under test.
#[derive(Default)]
pub(crate) struct Interleaved {
    pub(crate) inner: MemoryStore,
    /// Written (as if by a job worker) right after the next `jobs_for_link` read.
    finish_after_read: Mutex<Option<Job>>,
    /// The parent link's `overwrite` option at each `update_job`.
    overwrite_at_job_write: Mutex<Vec<bool>>,
}

impl Interleaved {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Finish `job` (already terminal, previously started) once the next
    /// `jobs_for_link` snapshot has been taken.
    pub(crate) fn finish_after_next_read(&self, job: Job) {
        if let Ok(mut slot) = self.finish_after_read.lock() {
            *slot = Some(job);
        }
    }

    pub(crate) fn overwrite_seen_by_job_writes(&self) -> Vec<bool> {
        self.overwrite_at_job_write
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveStore for Interleaved {
    async fn insert_link(&self, link: &Link) -> StoreResult<bool> {
        self.inner.insert_link(link).await
    }

    async fn get_link(&self, id: &Abid) -> StoreResult<Option<Link>> {
        self.inner.get_link(id).await
    }

    async fn find_link_by_url(&self, url: &str) -> StoreResult<Option<Link>> {
        self.inner.find_link_by_url(url).await
    }

    async fn list_links(
        &self,
        status: Option<LinkStatus>,
        limit: usize,
    ) -> StoreResult<Vec<Link>> {
        self.inner.list_links(status, limit).await
    }

    async fn due_links(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Link>> {
        self.inner.due_links(now, limit).await
    }

    async fn claim_link(
        &self,
        id: &Abid,
        expected: LinkStatus,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.claim_link(id, expected, now, lease_until).await
    }

    async fn update_link(&self, link: &Link, expected: LinkStatus) -> StoreResult<bool> {
        self.inner.update_link(link, expected).await
    }

    async fn update_link_metadata(&self, link: &Link) -> StoreResult<()> {
        self.inner.update_link_metadata(link).await
    }

    async fn touch_link(&self, id: &Abid, now: DateTime<Utc>) -> StoreResult<()> {
        self.inner.touch_link(id, now).await
    }

    async fn insert_job(&self, job: &Job) -> StoreResult<bool> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: &Abid) -> StoreResult<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn jobs_for_link(&self, link_id: &Abid) -> StoreResult<Vec<Job>> {
        let snapshot = self.inner.jobs_for_link(link_id).await?;
        let pending = self.finish_after_read.lock().ok().and_then(|mut j| j.take());
        if let Some(job) = pending {
            self.inner.update_job(&job, JobStatus::Started).await?;
            self.inner.touch_link(&job.link_id, Utc::now()).await?;
        }
        Ok(snapshot)
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>> {
        self.inner.due_jobs(now, limit).await
    }

    async fn claim_job(
        &self,
        id: &Abid,
        expected: JobStatus,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.claim_job(id, expected, now, lease_until).await
    }

    async fn update_job(&self, job: &Job, expected: JobStatus) -> StoreResult<bool> {
        if let Some(link) = self.inner.get_link(&job.link_id).await? {
            if let Ok(mut seen) = self.overwrite_at_job_write.lock() {
                seen.push(link.options.overwrite);
            }
        }
        self.inner.update_job(job, expected).await
    }

    async fn append_history(
        &self,
        link_id: &Abid,
        extractor: &str,
        entry: &HistoryEntry,
    ) -> StoreResult<()> {
        self.inner.append_history(link_id, extractor, entry).await
    }

    async fn history(
        &self,
        link_id: &Abid,
        extractor: Option<&str>,
    ) -> StoreResult<Vec<HistoryRecord>> {
        self.inner.history(link_id, extractor).await
    }

    async fn set_latest(
        &self,
        link_id: &Abid,
        extractor: &str,
        output: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner.set_latest(link_id, extractor, output, now).await
    }

    async fn latest(&self, link_id: &Abid) -> StoreResult<BTreeMap<String, String>> {
        self.inner.latest(link_id).await
    }

    async fn pending_counts(&self) -> StoreResult<(usize, usize)> {
        self.inner.pending_counts().await
    }
}
