//! In-memory [`ArchiveStore`] for tests and throwaway runs.
//!
//! One `RwLock` guards everything, so each trait call is atomic. Due rows are
//! indexed by `(retry_at, id)` so polling does not scan every entity.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ArchiveStore, StoreResult};
use crate::abid::Abid;
use crate::models::{HistoryEntry, HistoryRecord, Job, JobStatus, Link, LinkStatus};

type DueIndex = BTreeSet<(DateTime<Utc>, Abid)>;

#[derive(Default)]
struct Inner {
    links: HashMap<Abid, Link>,
    urls: HashMap<String, Abid>,
    jobs: HashMap<Abid, Job>,
    job_keys: HashSet<(Abid, String)>,
    history: Vec<HistoryRecord>,
    latest: HashMap<Abid, BTreeMap<String, String>>,
    due_links: DueIndex,
    due_jobs: DueIndex,
}

fn reindex(index: &mut DueIndex, id: &Abid, old: Option<DateTime<Utc>>, new: Option<DateTime<Utc>>) {
    if old == new {
        return;
    }
    if let Some(at) = old {
        index.remove(&(at, id.clone()));
    }
    if let Some(at) = new {
        index.insert((at, id.clone()));
    }
}

fn due_ids(index: &DueIndex, now: DateTime<Utc>, limit: usize) -> Vec<Abid> {
    index
        .iter()
        .take_while(|(at, _)| *at <= now)
        .take(limit)
        .map(|(_, id)| id.clone())
        .collect()
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveStore for MemoryStore {
    async fn insert_link(&self, link: &Link) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.urls.contains_key(&link.url) || inner.links.contains_key(&link.id) {
            return Ok(false);
        }
        inner.urls.insert(link.url.clone(), link.id.clone());
        reindex(&mut inner.due_links, &link.id, None, link.retry_at);
        inner.links.insert(link.id.clone(), link.clone());
        Ok(true)
    }

    async fn get_link(&self, id: &Abid) -> StoreResult<Option<Link>> {
        Ok(self.inner.read().await.links.get(id).cloned())
    }

    async fn find_link_by_url(&self, url: &str) -> StoreResult<Option<Link>> {
        let inner = self.inner.read().await;
        Ok(inner
            .urls
            .get(url)
            .and_then(|id| inner.links.get(id))
            .cloned())
    }

    async fn list_links(
        &self,
        status: Option<LinkStatus>,
        limit: usize,
    ) -> StoreResult<Vec<Link>> {
        let inner = self.inner.read().await;
        let mut links: Vec<Link> = inner
            .links
            .values()
            .filter(|l| status.map_or(true, |s| l.status == s))
            .cloned()
            .collect();
        links.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        links.truncate(limit);
        Ok(links)
    }

    async fn due_links(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Link>> {
        let inner = self.inner.read().await;
        Ok(due_ids(&inner.due_links, now, limit)
            .iter()
            .filter_map(|id| inner.links.get(id).cloned())
            .collect())
    }

    async fn claim_link(
        &self,
        id: &Abid,
        expected: LinkStatus,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(link) = inner.links.get_mut(id) else {
            return Ok(false);
        };
        if link.status != expected || !link.is_due(now) {
            return Ok(false);
        }
        reindex(&mut inner.due_links, id, link.retry_at, Some(lease_until));
        link.retry_at = Some(lease_until);
        Ok(true)
    }

    async fn update_link(&self, link: &Link, expected: LinkStatus) -> StoreResult<bool> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(stored) = inner.links.get_mut(&link.id) else {
            return Ok(false);
        };
        if stored.status != expected {
            return Ok(false);
        }
        reindex(&mut inner.due_links, &link.id, stored.retry_at, link.retry_at);
        stored.status = link.status;
        stored.retry_at = link.retry_at;
        stored.end_ts = link.end_ts;
        stored.options = link.options.clone();
        Ok(true)
    }

    async fn update_link_metadata(&self, link: &Link) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(stored) = inner.links.get_mut(&link.id) {
            stored.title = link.title.clone();
            stored.tags = link.tags.clone();
        }
        Ok(())
    }

    async fn touch_link(&self, id: &Abid, now: DateTime<Utc>) -> StoreResult<()> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if let Some(link) = inner.links.get_mut(id) {
            if link.status != LinkStatus::Sealed {
                reindex(&mut inner.due_links, id, link.retry_at, Some(now));
                link.retry_at = Some(now);
            }
        }
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let key = (job.link_id.clone(), job.extractor.clone());
        if inner.job_keys.contains(&key) || inner.jobs.contains_key(&job.id) {
            return Ok(false);
        }
        inner.job_keys.insert(key);
        reindex(&mut inner.due_jobs, &job.id, None, job.retry_at);
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(true)
    }

    async fn get_job(&self, id: &Abid) -> StoreResult<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(id).cloned())
    }

    async fn jobs_for_link(&self, link_id: &Abid) -> StoreResult<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| &j.link_id == link_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (a.created_at, &a.extractor).cmp(&(b.created_at, &b.extractor)));
        Ok(jobs)
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>> {
        let inner = self.inner.read().await;
        Ok(due_ids(&inner.due_jobs, now, limit)
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    async fn claim_job(
        &self,
        id: &Abid,
        expected: JobStatus,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(false);
        };
        if job.status != expected || !job.is_due(now) {
            return Ok(false);
        }
        reindex(&mut inner.due_jobs, id, job.retry_at, Some(lease_until));
        job.retry_at = Some(lease_until);
        Ok(true)
    }

    async fn update_job(&self, job: &Job, expected: JobStatus) -> StoreResult<bool> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(stored) = inner.jobs.get_mut(&job.id) else {
            return Ok(false);
        };
        if stored.status != expected {
            return Ok(false);
        }
        reindex(&mut inner.due_jobs, &job.id, stored.retry_at, job.retry_at);
        *stored = job.clone();
        Ok(true)
    }

    async fn append_history(
        &self,
        link_id: &Abid,
        extractor: &str,
        entry: &HistoryEntry,
    ) -> StoreResult<()> {
        self.inner.write().await.history.push(HistoryRecord {
            link_id: link_id.clone(),
            extractor: extractor.to_string(),
            entry: entry.clone(),
        });
        Ok(())
    }

    async fn history(
        &self,
        link_id: &Abid,
        extractor: Option<&str>,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .history
            .iter()
            .filter(|r| &r.link_id == link_id)
            .filter(|r| extractor.map_or(true, |e| r.extractor == e))
            .cloned()
            .collect())
    }

    async fn set_latest(
        &self,
        link_id: &Abid,
        extractor: &str,
        output: &str,
        _now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .latest
            .entry(link_id.clone())
            .or_default()
            .insert(extractor.to_string(), output.to_string());
        Ok(())
    }

    async fn latest(&self, link_id: &Abid) -> StoreResult<BTreeMap<String, String>> {
        Ok(self
            .inner
            .read()
            .await
            .latest
            .get(link_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn pending_counts(&self) -> StoreResult<(usize, usize)> {
        let inner = self.inner.read().await;
        let links = inner.links.values().filter(|l| !l.status.is_terminal()).count();
        let jobs = inner.jobs.values().filter(|j| !j.status.is_terminal()).count();
        Ok((links, jobs))
    }
}
