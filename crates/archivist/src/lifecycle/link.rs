//! Link ticks: queued → started → sealed.
//!
//! A started link is a join over its jobs. It re-checks them whenever a job
//! transition touches it, and otherwise every `poll` interval.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::task;
use tracing::{debug, info, warn};

use super::Transition;
use crate::error::ArchiveResult;
use crate::extractors::ExtractorRegistry;
use crate::models::{Job, JobStatus, Link, LinkStatus};
use crate::output::{collect_files, discover_title, write_manifest, LinkManifest, OutputLayout};
use crate::repository::ArchiveStore;

pub struct LinkMachine {
    store: Arc<dyn ArchiveStore>,
    registry: Arc<ExtractorRegistry>,
    layout: OutputLayout,
    salt: String,
    poll: Duration,
}

impl LinkMachine {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        registry: Arc<ExtractorRegistry>,
        layout: OutputLayout,
        salt: impl Into<String>,
        poll: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            layout,
            salt: salt.into(),
            poll,
        }
    }

    /// Advance a claimed link by one step.
    pub async fn tick(&self, link: Link) -> ArchiveResult<Transition<LinkStatus>> {
        match link.status {
            LinkStatus::Queued => self.schedule(link).await,
            LinkStatus::Started => self.join(link).await,
            LinkStatus::Sealed => Ok(Transition::Idle),
        }
    }

    /// Create one job per wanted extractor, then start the link.
    async fn schedule(&self, mut link: Link) -> ArchiveResult<Transition<LinkStatus>> {
        let now = Utc::now();
        let jobs: Vec<Job> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| link.options.wants(name))
            .map(|name| Job::new(&link, name, &self.salt, now))
            .collect();

        let inserted = join_all(jobs.iter().map(|job| self.store.insert_job(job)))
            .await
            .into_iter()
            .collect::<Result<Vec<bool>, _>>()?;
        let created = inserted.iter().filter(|&&new| new).count();

        link.enter_started(now, self.poll);
        if !self.store.update_link(&link, LinkStatus::Queued).await? {
            return Ok(Transition::Lost);
        }
        info!(
            "Link {} started with {} new job(s) ({} wanted)",
            link.id,
            created,
            jobs.len()
        );

        let current = self.store.jobs_for_link(&link.id).await?;
        if current.iter().all(|j| j.status.is_terminal()) {
            // Nothing to wait for (no extractor wanted, or all done already).
            return Ok(match self.seal(link, current).await? {
                Transition::Moved { .. } => {
                    Transition::moved(LinkStatus::Queued, LinkStatus::Sealed)
                }
                other => other,
            });
        }
        Ok(Transition::moved(LinkStatus::Queued, LinkStatus::Started))
    }

    async fn join(&self, mut link: Link) -> ArchiveResult<Transition<LinkStatus>> {
        let jobs = self.store.jobs_for_link(&link.id).await?;
        let pending = jobs.iter().filter(|j| !j.status.is_terminal()).count();
        if pending == 0 {
            return self.seal(link, jobs).await;
        }

        link.wait_for_jobs(Utc::now(), self.poll);
        if !self.store.update_link(&link, LinkStatus::Started).await? {
            return Ok(Transition::Lost);
        }

        // A job finishing after the snapshot above had its touch overwritten.
        let jobs = self.store.jobs_for_link(&link.id).await?;
        let pending = jobs.iter().filter(|j| !j.status.is_terminal()).count();
        if pending == 0 {
            return self.seal(link, jobs).await;
        }
        debug!(
            "Link {} waiting on {}/{} job(s)",
            link.id,
            pending,
            jobs.len()
        );
        Ok(Transition::moved(LinkStatus::Started, LinkStatus::Started))
    }

    /// Write the manifest, then seal. Every job in `jobs` is terminal.
    async fn seal(&self, mut link: Link, jobs: Vec<Job>) -> ArchiveResult<Transition<LinkStatus>> {
        let now = Utc::now();
        let link_dir = self.layout.link_dir(&link.id);

        let wants_title = link.title.is_none();
        let scan_dir = link_dir.clone();
        let (discovered, files) = match task::spawn_blocking(move || {
            let title = wants_title.then(|| discover_title(&scan_dir)).flatten();
            (title, collect_files(&scan_dir))
        })
        .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!("Scanning {} failed: {}", link_dir.display(), e);
                (None, Vec::new())
            }
        };
        if discovered.is_some() {
            link.title = discovered.clone();
        }
        let mut sealed = link.clone();
        sealed.enter_sealed(now);

        let manifest = LinkManifest {
            link: sealed.clone(),
            sealed_at: now,
            latest: self.store.latest(&link.id).await?,
            history: self.store.history(&link.id, None).await?,
            files,
            jobs,
        };
        let job_count = manifest.jobs.len();
        let failed = manifest
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .count();
        let file_count = manifest.files.len();
        let layout = self.layout.clone();
        let written = task::spawn_blocking(move || write_manifest(&layout, &manifest))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));
        if let Err(e) = written {
            // Sealing must not hinge on the manifest; the link is still done.
            warn!("Could not write manifest for {}: {}", link.id, e);
        }

        if !self.store.update_link(&sealed, LinkStatus::Started).await? {
            return Ok(Transition::Lost);
        }
        if let Some(title) = discovered {
            // Re-read so tags edited meanwhile are not overwritten.
            if let Some(mut current) = self.store.get_link(&sealed.id).await? {
                current.title = Some(title);
                self.store.update_link_metadata(&current).await?;
            }
        }

        info!(
            "Link {} sealed: {} job(s), {} failed, {} file(s)",
            sealed.id, job_count, failed, file_count
        );
        Ok(Transition::moved(LinkStatus::Started, LinkStatus::Sealed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArchiveOptions;
    use crate::repository::test_support::Interleaved;
    use crate::repository::MemoryStore;
    use tempfile::tempdir;

    fn machine(store: Arc<MemoryStore>, root: &std::path::Path, names: &[&str]) -> LinkMachine {
        let mut registry = ExtractorRegistry::new();
        for name in names {
            registry.register(Arc::new(crate::extractors::test_support::Noop::new(name)));
        }
        LinkMachine::new(
            store,
            Arc::new(registry),
            OutputLayout::new(root, 0o755, 0o644),
            "s",
            Duration::from_secs(5),
        )
    }

    fn link(options: ArchiveOptions) -> Link {
        Link::new("https://example.com/", "example.com", vec![], options, "s", Utc::now())
    }

    #[tokio::test]
    async fn test_schedule_creates_wanted_jobs_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone(), dir.path(), &["a", "b", "c"]);
        let link = link(ArchiveOptions {
            overwrite: false,
            only: vec!["a".into(), "c".into()],
        });
        store.insert_link(&link).await.unwrap();

        let t = m.tick(link.clone()).await.unwrap();
        assert_eq!(t, Transition::moved(LinkStatus::Queued, LinkStatus::Started));
        let jobs = store.jobs_for_link(&link.id).await.unwrap();
        let mut names: Vec<_> = jobs.iter().map(|j| j.extractor.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);

        // A replayed queued tick cannot start twice or duplicate jobs
        assert_eq!(m.tick(link.clone()).await.unwrap(), Transition::Lost);
        assert_eq!(store.jobs_for_link(&link.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_jobs_seals_immediately() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone(), dir.path(), &[]);
        let link = link(ArchiveOptions::default());
        store.insert_link(&link).await.unwrap();

        let t = m.tick(link.clone()).await.unwrap();
        assert_eq!(t, Transition::moved(LinkStatus::Queued, LinkStatus::Sealed));
        let stored = store.get_link(&link.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LinkStatus::Sealed);
        assert!(stored.retry_at.is_none());
        assert!(dir.path().join(link.id.as_str()).join("index.json").exists());
    }

    #[tokio::test]
    async fn test_join_waits_for_every_job() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone(), dir.path(), &["a", "b"]);
        let link = link(ArchiveOptions::default());
        store.insert_link(&link).await.unwrap();
        m.tick(link.clone()).await.unwrap();

        let mut jobs = store.jobs_for_link(&link.id).await.unwrap();
        let now = Utc::now();
        jobs[0].enter_started(now, Duration::from_secs(60));
        store.update_job(&jobs[0], JobStatus::Queued).await.unwrap();
        jobs[0].enter_succeeded(now, Some("a".into()));
        store.update_job(&jobs[0], JobStatus::Started).await.unwrap();

        let started = store.get_link(&link.id).await.unwrap().unwrap();
        let t = m.tick(started).await.unwrap();
        assert_eq!(t, Transition::moved(LinkStatus::Started, LinkStatus::Started));
        assert!(store.get_link(&link.id).await.unwrap().unwrap().retry_at.unwrap() > now);

        jobs[1].enter_started(now, Duration::from_secs(60));
        store.update_job(&jobs[1], JobStatus::Queued).await.unwrap();
        jobs[1].enter_failed(now, &crate::error::ExtractorError::NotFound);
        store.update_job(&jobs[1], JobStatus::Started).await.unwrap();

        let started = store.get_link(&link.id).await.unwrap().unwrap();
        let t = m.tick(started).await.unwrap();
        assert_eq!(t, Transition::moved(LinkStatus::Started, LinkStatus::Sealed));
    }

    #[tokio::test]
    async fn test_seal_picks_up_title() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone(), dir.path(), &[]);
        let link = link(ArchiveOptions::default());
        store.insert_link(&link).await.unwrap();
        let link_dir = dir.path().join(link.id.as_str());
        std::fs::create_dir_all(&link_dir).unwrap();
        std::fs::write(link_dir.join("output.html"), "<title>Example</title>").unwrap();

        m.tick(link.clone()).await.unwrap();
        let stored = store.get_link(&link.id).await.unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Example"));
    }

    #[tokio::test]
    async fn test_job_finishing_during_join_seals_without_waiting() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Interleaved::new());
        let mut registry = ExtractorRegistry::new();
        for name in ["a", "b"] {
            registry.register(Arc::new(crate::extractors::test_support::Noop::new(name)));
        }
        let m = LinkMachine::new(
            store.clone(),
            Arc::new(registry),
            OutputLayout::new(dir.path(), 0o755, 0o644),
            "s",
            Duration::from_secs(3600),
        );
        let link = link(ArchiveOptions::default());
        store.insert_link(&link).await.unwrap();
        m.tick(link.clone()).await.unwrap();

        let mut jobs = store.jobs_for_link(&link.id).await.unwrap();
        let now = Utc::now();
        for job in jobs.iter_mut() {
            job.enter_started(now, Duration::from_secs(60));
            store.update_job(job, JobStatus::Queued).await.unwrap();
        }
        jobs[0].enter_succeeded(now, None);
        store.update_job(&jobs[0], JobStatus::Started).await.unwrap();
        jobs[1].enter_succeeded(now, None);
        store.finish_after_next_read(jobs[1].clone());

        let started = store.get_link(&link.id).await.unwrap().unwrap();
        let t = m.tick(started).await.unwrap();
        assert_eq!(t, Transition::moved(LinkStatus::Started, LinkStatus::Sealed));
        let stored = store.get_link(&link.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LinkStatus::Sealed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_artifact_does_not_block_seal() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let m = machine(store.clone(), dir.path(), &[]);
        let link = link(ArchiveOptions::default());
        store.insert_link(&link).await.unwrap();
        let locked = dir.path().join(link.id.as_str()).join("wget");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(locked.join("index.html"), "<html>").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let t = m.tick(link.clone()).await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(t.unwrap(), Transition::moved(LinkStatus::Queued, LinkStatus::Sealed));
        let stored = store.get_link(&link.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LinkStatus::Sealed);
        assert!(dir.path().join(link.id.as_str()).join("index.json").exists());
    }
}
