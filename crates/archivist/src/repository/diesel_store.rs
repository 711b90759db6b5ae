//! SQLite-backed [`ArchiveStore`].

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::SqlitePool;
use super::records::{
    ArchiveResultRecord, JobRecord, LatestOutputRecord, LinkRecord, NewArchiveResult, NewJob,
    NewLatestOutput, NewLink,
};
use super::util::{format_ts, format_ts_opt};
use super::{ArchiveStore, StoreResult};
use crate::abid::Abid;
use crate::models::{HistoryEntry, HistoryRecord, Job, JobStatus, Link, LinkStatus};
use crate::schema::{archive_results, jobs, latest_outputs, links};
use crate::with_conn;

const ACTIVE_JOB_STATUSES: [&str; 3] = ["queued", "started", "backoff"];

#[derive(Clone, Debug)]
pub struct DieselStore {
    pool: SqlitePool,
}

impl DieselStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(SqlitePool::from_path(path))
    }
}

#[async_trait]
impl ArchiveStore for DieselStore {
    async fn insert_link(&self, link: &Link) -> StoreResult<bool> {
        let row = NewLink::from_link(link)?;
        let inserted = with_conn!(self.pool, conn => {
            diesel::insert_or_ignore_into(links::table)
                .values(&row)
                .execute(&mut conn)
                .await?
        });
        Ok(inserted == 1)
    }

    async fn get_link(&self, id: &Abid) -> StoreResult<Option<Link>> {
        let record = with_conn!(self.pool, conn => {
            links::table
                .find(id.as_str())
                .select(LinkRecord::as_select())
                .first::<LinkRecord>(&mut conn)
                .await
                .optional()?
        });
        Ok(record.map(Link::try_from).transpose()?)
    }

    async fn find_link_by_url(&self, url: &str) -> StoreResult<Option<Link>> {
        let record = with_conn!(self.pool, conn => {
            links::table
                .filter(links::url.eq(url))
                .select(LinkRecord::as_select())
                .first::<LinkRecord>(&mut conn)
                .await
                .optional()?
        });
        Ok(record.map(Link::try_from).transpose()?)
    }

    async fn list_links(
        &self,
        status: Option<LinkStatus>,
        limit: usize,
    ) -> StoreResult<Vec<Link>> {
        let records = with_conn!(self.pool, conn => {
            let mut query = links::table
                .select(LinkRecord::as_select())
                .into_boxed();
            if let Some(status) = status {
                query = query.filter(links::status.eq(status.as_str()));
            }
            query
                .order((links::created_at.desc(), links::id.desc()))
                .limit(limit as i64)
                .load::<LinkRecord>(&mut conn)
                .await?
        });
        Ok(records
            .into_iter()
            .map(Link::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn due_links(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Link>> {
        let now = format_ts(now);
        let records = with_conn!(self.pool, conn => {
            links::table
                .filter(links::retry_at.le(&now))
                .order(links::retry_at.asc())
                .limit(limit as i64)
                .select(LinkRecord::as_select())
                .load::<LinkRecord>(&mut conn)
                .await?
        });
        Ok(records
            .into_iter()
            .map(Link::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn claim_link(
        &self,
        id: &Abid,
        expected: LinkStatus,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let (now, lease_until) = (format_ts(now), format_ts(lease_until));
        let claimed = with_conn!(self.pool, conn => {
            diesel::update(
                links::table
                    .filter(links::id.eq(id.as_str()))
                    .filter(links::status.eq(expected.as_str()))
                    .filter(links::retry_at.le(&now)),
            )
            .set(links::retry_at.eq(&lease_until))
            .execute(&mut conn)
            .await?
        });
        Ok(claimed == 1)
    }

    async fn update_link(&self, link: &Link, expected: LinkStatus) -> StoreResult<bool> {
        let options = serde_json::to_string(&link.options)?;
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                links::table
                    .filter(links::id.eq(link.id.as_str()))
                    .filter(links::status.eq(expected.as_str())),
            )
            .set((
                links::status.eq(link.status.as_str()),
                links::retry_at.eq(format_ts_opt(link.retry_at)),
                links::end_ts.eq(format_ts_opt(link.end_ts)),
                links::options.eq(&options),
            ))
            .execute(&mut conn)
            .await?
        });
        Ok(updated == 1)
    }

    async fn update_link_metadata(&self, link: &Link) -> StoreResult<()> {
        let tags = serde_json::to_string(&link.tags)?;
        with_conn!(self.pool, conn => {
            diesel::update(links::table.find(link.id.as_str()))
                .set((links::title.eq(link.title.as_deref()), links::tags.eq(&tags)))
                .execute(&mut conn)
                .await?
        });
        Ok(())
    }

    async fn touch_link(&self, id: &Abid, now: DateTime<Utc>) -> StoreResult<()> {
        let now = format_ts(now);
        with_conn!(self.pool, conn => {
            diesel::update(
                links::table
                    .filter(links::id.eq(id.as_str()))
                    .filter(links::status.ne(LinkStatus::Sealed.as_str())),
            )
            .set(links::retry_at.eq(&now))
            .execute(&mut conn)
            .await?
        });
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> StoreResult<bool> {
        let row = NewJob::from_job(job)?;
        let inserted = with_conn!(self.pool, conn => {
            diesel::insert_or_ignore_into(jobs::table)
                .values(&row)
                .execute(&mut conn)
                .await?
        });
        Ok(inserted == 1)
    }

    async fn get_job(&self, id: &Abid) -> StoreResult<Option<Job>> {
        let record = with_conn!(self.pool, conn => {
            jobs::table
                .find(id.as_str())
                .select(JobRecord::as_select())
                .first::<JobRecord>(&mut conn)
                .await
                .optional()?
        });
        Ok(record.map(Job::try_from).transpose()?)
    }

    async fn jobs_for_link(&self, link_id: &Abid) -> StoreResult<Vec<Job>> {
        let records = with_conn!(self.pool, conn => {
            jobs::table
                .filter(jobs::link_id.eq(link_id.as_str()))
                .order((jobs::created_at.asc(), jobs::extractor.asc()))
                .select(JobRecord::as_select())
                .load::<JobRecord>(&mut conn)
                .await?
        });
        Ok(records
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>> {
        let now = format_ts(now);
        let records = with_conn!(self.pool, conn => {
            jobs::table
                .filter(jobs::retry_at.le(&now))
                .order(jobs::retry_at.asc())
                .limit(limit as i64)
                .select(JobRecord::as_select())
                .load::<JobRecord>(&mut conn)
                .await?
        });
        Ok(records
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn claim_job(
        &self,
        id: &Abid,
        expected: JobStatus,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let (now, lease_until) = (format_ts(now), format_ts(lease_until));
        let claimed = with_conn!(self.pool, conn => {
            diesel::update(
                jobs::table
                    .filter(jobs::id.eq(id.as_str()))
                    .filter(jobs::status.eq(expected.as_str()))
                    .filter(jobs::retry_at.le(&now)),
            )
            .set(jobs::retry_at.eq(&lease_until))
            .execute(&mut conn)
            .await?
        });
        Ok(claimed == 1)
    }

    async fn update_job(&self, job: &Job, expected: JobStatus) -> StoreResult<bool> {
        let row = NewJob::from_job(job)?;
        let updated = with_conn!(self.pool, conn => {
            diesel::update(
                jobs::table
                    .filter(jobs::id.eq(job.id.as_str()))
                    .filter(jobs::status.eq(expected.as_str())),
            )
            .set(&row)
            .execute(&mut conn)
            .await?
        });
        Ok(updated == 1)
    }

    async fn append_history(
        &self,
        link_id: &Abid,
        extractor: &str,
        entry: &HistoryEntry,
    ) -> StoreResult<()> {
        let row = NewArchiveResult {
            link_id: link_id.as_str(),
            extractor,
            timestamp: format_ts(entry.timestamp),
            status: entry.status.as_str(),
            duration_ms: i64::try_from(entry.duration_ms).unwrap_or(i64::MAX),
            cmd: serde_json::to_string(&entry.cmd)?,
            cmd_version: entry.cmd_version.as_deref(),
            output: entry.output.as_deref(),
            error: entry.error.as_deref(),
        };
        with_conn!(self.pool, conn => {
            diesel::insert_into(archive_results::table)
                .values(&row)
                .execute(&mut conn)
                .await?
        });
        Ok(())
    }

    async fn history(
        &self,
        link_id: &Abid,
        extractor: Option<&str>,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let records = with_conn!(self.pool, conn => {
            let mut query = archive_results::table
                .filter(archive_results::link_id.eq(link_id.as_str()))
                .select(ArchiveResultRecord::as_select())
                .into_boxed();
            if let Some(extractor) = extractor {
                query = query.filter(archive_results::extractor.eq(extractor));
            }
            query
                .order(archive_results::id.asc())
                .load::<ArchiveResultRecord>(&mut conn)
                .await?
        });
        Ok(records
            .into_iter()
            .map(HistoryRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn set_latest(
        &self,
        link_id: &Abid,
        extractor: &str,
        output: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        with_conn!(self.pool, conn => {
            diesel::replace_into(latest_outputs::table)
                .values(NewLatestOutput {
                    link_id: link_id.as_str(),
                    extractor,
                    output,
                    updated_at: format_ts(now),
                })
                .execute(&mut conn)
                .await?
        });
        Ok(())
    }

    async fn latest(&self, link_id: &Abid) -> StoreResult<BTreeMap<String, String>> {
        let records = with_conn!(self.pool, conn => {
            latest_outputs::table
                .filter(latest_outputs::link_id.eq(link_id.as_str()))
                .select(LatestOutputRecord::as_select())
                .load::<LatestOutputRecord>(&mut conn)
                .await?
        });
        Ok(records
            .into_iter()
            .map(|r| (r.extractor, r.output))
            .collect())
    }

    async fn pending_counts(&self) -> StoreResult<(usize, usize)> {
        let (open_links, open_jobs) = with_conn!(self.pool, conn => {
            let open_links: i64 = links::table
                .filter(links::status.ne(LinkStatus::Sealed.as_str()))
                .count()
                .get_result(&mut conn)
                .await?;
            let open_jobs: i64 = jobs::table
                .filter(jobs::status.eq_any(ACTIVE_JOB_STATUSES))
                .count()
                .get_result(&mut conn)
                .await?;
            (open_links, open_jobs)
        });
        Ok((open_links.max(0) as usize, open_jobs.max(0) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArchiveOptions;
    use crate::repository::run_migrations;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, DieselStore) {
        let dir = tempdir().unwrap();
        let db = dir.path().join("index.sqlite3");
        run_migrations(&db.display().to_string()).await.unwrap();
        (dir, DieselStore::from_path(&db))
    }

    fn link(url: &str) -> Link {
        Link::new(url, "example.com", vec!["t".into()], ArchiveOptions::default(), "salt", Utc::now())
    }

    #[tokio::test]
    async fn test_link_round_trip() {
        let (_dir, store) = setup().await;
        let link = link("https://example.com/");

        assert!(store.insert_link(&link).await.unwrap());
        let loaded = store.get_link(&link.id).await.unwrap().unwrap();
        assert_eq!(loaded.url, link.url);
        assert_eq!(loaded.tags, link.tags);
        assert_eq!(loaded.status, LinkStatus::Queued);
        assert_eq!(loaded.tie_break, link.tie_break);

        let by_url = store.find_link_by_url("https://example.com/").await.unwrap();
        assert_eq!(by_url.map(|l| l.id), Some(link.id));
    }

    #[tokio::test]
    async fn test_duplicate_url_is_ignored() {
        let (_dir, store) = setup().await;
        assert!(store.insert_link(&link("https://example.com/")).await.unwrap());
        assert!(!store.insert_link(&link("https://example.com/")).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (_dir, store) = setup().await;
        let link = link("https://example.com/");
        store.insert_link(&link).await.unwrap();

        let now = Utc::now();
        let lease = now + chrono::Duration::seconds(60);
        assert!(store.claim_link(&link.id, LinkStatus::Queued, now, lease).await.unwrap());
        assert!(!store.claim_link(&link.id, LinkStatus::Queued, now, lease).await.unwrap());
        assert!(store.due_links(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_insert_is_unique_per_extractor() {
        let (_dir, store) = setup().await;
        let link = link("https://example.com/");
        store.insert_link(&link).await.unwrap();

        let now = Utc::now();
        assert!(store.insert_job(&Job::new(&link, "pdf", "salt", now)).await.unwrap());
        assert!(!store.insert_job(&Job::new(&link, "pdf", "salt", now)).await.unwrap());
        assert_eq!(store.jobs_for_link(&link.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_job_requires_expected_status() {
        let (_dir, store) = setup().await;
        let link = link("https://example.com/");
        store.insert_link(&link).await.unwrap();
        let mut job = Job::new(&link, "pdf", "salt", Utc::now());
        store.insert_job(&job).await.unwrap();

        job.enter_started(Utc::now(), std::time::Duration::from_secs(30));
        assert!(!store.update_job(&job, JobStatus::Backoff).await.unwrap());
        assert!(store.update_job(&job, JobStatus::Queued).await.unwrap());

        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Started);
        assert_eq!(loaded.retries, 1);
    }

    #[tokio::test]
    async fn test_touch_skips_sealed_links() {
        let (_dir, store) = setup().await;
        let mut link = link("https://example.com/");
        store.insert_link(&link).await.unwrap();

        let now = Utc::now();
        link.enter_started(now, std::time::Duration::from_secs(300));
        store.update_link(&link, LinkStatus::Queued).await.unwrap();
        store.touch_link(&link.id, now).await.unwrap();
        assert_eq!(store.due_links(now, 10).await.unwrap().len(), 1);

        link.enter_sealed(now);
        store.update_link(&link, LinkStatus::Started).await.unwrap();
        store.touch_link(&link.id, now).await.unwrap();
        let loaded = store.get_link(&link.id).await.unwrap().unwrap();
        assert!(loaded.retry_at.is_none());
        assert_eq!(store.pending_counts().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_history_and_latest() {
        let (_dir, store) = setup().await;
        let link = link("https://example.com/");
        store.insert_link(&link).await.unwrap();

        let now = Utc::now();
        store
            .append_history(&link.id, "pdf", &HistoryEntry::skipped(now, None))
            .await
            .unwrap();
        store
            .append_history(
                &link.id,
                "pdf",
                &HistoryEntry::skipped(now, Some("output.pdf".into())),
            )
            .await
            .unwrap();
        store.set_latest(&link.id, "pdf", "output.pdf", now).await.unwrap();
        store.set_latest(&link.id, "pdf", "output.pdf", now).await.unwrap();

        let history = store.history(&link.id, Some("pdf")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].entry.output.as_deref(), Some("output.pdf"));
        assert!(store.history(&link.id, Some("wget")).await.unwrap().is_empty());

        let latest = store.latest(&link.id).await.unwrap();
        assert_eq!(latest.get("pdf").map(String::as_str), Some("output.pdf"));
    }
}
