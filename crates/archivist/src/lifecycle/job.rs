//! Job ticks: queued → started → succeeded | backoff | failed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::Transition;
use crate::error::{ArchiveError, ArchiveResult, ExtractorError};
use crate::extractors::{Extractor, ExtractorRegistry};
use crate::models::{HistoryEntry, HistoryStatus, Job, JobStatus, Link};
use crate::output::OutputLayout;
use crate::repository::ArchiveStore;

/// Timeout assumed for a job whose extractor is no longer registered.
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts a job may start before a transient failure becomes final.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn allows_retry(&self, job: &Job, error: &ExtractorError) -> bool {
        error.is_transient() && job.retries < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

pub struct JobMachine {
    store: Arc<dyn ArchiveStore>,
    registry: Arc<ExtractorRegistry>,
    layout: OutputLayout,
    retry: RetryPolicy,
    grace: Duration,
}

impl JobMachine {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        registry: Arc<ExtractorRegistry>,
        layout: OutputLayout,
        retry: RetryPolicy,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            layout,
            retry,
            grace,
        }
    }

    /// Timeout of the job's extractor.
    pub fn timeout_for(&self, job: &Job) -> Duration {
        self.registry
            .get(&job.extractor)
            .map(|e| e.timeout())
            .unwrap_or(FALLBACK_TIMEOUT)
    }

    /// How long a started attempt holds its row: the extractor timeout plus grace.
    pub fn lease_for(&self, job: &Job) -> Duration {
        self.timeout_for(job) + self.grace
    }

    /// Advance a claimed job by one step.
    pub async fn tick(&self, job: Job) -> ArchiveResult<Transition<JobStatus>> {
        match job.status {
            JobStatus::Queued => self.start(job).await,
            JobStatus::Backoff => self.requeue(job).await,
            JobStatus::Started => self.abandon(job).await,
            JobStatus::Succeeded | JobStatus::Failed => Ok(Transition::Idle),
        }
    }

    async fn requeue(&self, mut job: Job) -> ArchiveResult<Transition<JobStatus>> {
        let now = Utc::now();
        job.enter_queued(now);
        if !self.store.update_job(&job, JobStatus::Backoff).await? {
            return Ok(Transition::Lost);
        }
        debug!("Job {} ({}) requeued after backoff", job.id, job.extractor);
        self.store.touch_link(&job.link_id, now).await?;
        Ok(Transition::moved(JobStatus::Backoff, JobStatus::Queued))
    }

    /// A started job whose lease ran out: its worker died or overran its budget.
    async fn abandon(&self, job: Job) -> ArchiveResult<Transition<JobStatus>> {
        let timeout = self.timeout_for(&job);
        warn!(
            "Job {} ({}) lease expired during attempt {}; treating as timed out",
            job.id, job.extractor, job.retries
        );
        let error = ExtractorError::Timeout(timeout);
        let started = job.start_ts.unwrap_or_else(Utc::now);
        let mut entry = failed_entry(&job, &error, Utc::now(), elapsed_ms(started));
        entry.error = entry.error.map(|e| format!("attempt abandoned: {}", e));
        self.finish_failure(job, error, timeout, entry).await
    }

    async fn start(&self, mut job: Job) -> ArchiveResult<Transition<JobStatus>> {
        let Some(link) = self.store.get_link(&job.link_id).await? else {
            return Err(ArchiveError::LinkNotFound(job.link_id.to_string()));
        };
        let extractor = self.registry.get(&job.extractor);
        let timeout = extractor
            .as_ref()
            .map(|e| e.timeout())
            .unwrap_or(FALLBACK_TIMEOUT);

        let now = Utc::now();
        job.enter_started(now, timeout + self.grace);
        if !self.store.update_job(&job, JobStatus::Queued).await? {
            return Ok(Transition::Lost);
        }
        self.store.touch_link(&link.id, now).await?;
        info!(
            "Job {} ({}) started attempt {} for {}",
            job.id, job.extractor, job.retries, link.url
        );

        let Some(extractor) = extractor else {
            let error = ExtractorError::UnknownExtractor(job.extractor.clone());
            let entry = failed_entry(&job, &error, now, 0);
            return self.finish_failure(job, error, timeout, entry).await;
        };

        let link_dir = self.layout.link_dir(&link.id);
        if let Err(e) = self.layout.ensure_dir(&link_dir) {
            let error = ExtractorError::Io(format!("{}: {}", link_dir.display(), e));
            let entry = failed_entry(&job, &error, now, 0);
            return self.finish_failure(job, error, timeout, entry).await;
        }

        if !extractor.should_run(&link, &link_dir, link.options.overwrite) {
            return self.skip(job, &link, extractor.as_ref(), &link_dir).await;
        }

        let result = extractor.run(&link, &link_dir, timeout).await;
        job.record_command(
            result.cmd,
            result.cmd_version,
            Some(result.pwd.display().to_string()),
        );
        let finished = Utc::now();
        let duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX);

        match result.outcome {
            Ok(path) => {
                let output = path.display().to_string();
                let entry = HistoryEntry {
                    timestamp: finished,
                    status: HistoryStatus::Succeeded,
                    duration_ms,
                    cmd: job.cmd.clone(),
                    cmd_version: job.cmd_version.clone(),
                    output: Some(output.clone()),
                    error: None,
                };
                job.enter_succeeded(finished, Some(output));
                self.finish_success(job, entry).await
            }
            Err(error) => {
                let entry = failed_entry(&job, &error, finished, duration_ms);
                self.finish_failure(job, error, timeout, entry).await
            }
        }
    }

    /// Artifact already present (or extractor not applicable): succeed without running.
    async fn skip(
        &self,
        mut job: Job,
        link: &Link,
        extractor: &dyn Extractor,
        link_dir: &Path,
    ) -> ArchiveResult<Transition<JobStatus>> {
        let now = Utc::now();
        let output = extractor
            .applies_to(link)
            .then(|| extractor.output_path().display().to_string());
        debug!(
            "Job {} ({}) skipped for {} ({})",
            job.id,
            job.extractor,
            link.url,
            match output {
                Some(ref path) => format!("{} exists in {}", path, link_dir.display()),
                None => "not applicable".to_string(),
            }
        );
        let entry = HistoryEntry::skipped(now, output.clone());
        job.enter_succeeded(now, output);
        self.finish_success(job, entry).await
    }

    async fn finish_success(
        &self,
        job: Job,
        entry: HistoryEntry,
    ) -> ArchiveResult<Transition<JobStatus>> {
        if !self.store.update_job(&job, JobStatus::Started).await? {
            return Ok(Transition::Lost);
        }
        self.store
            .append_history(&job.link_id, &job.extractor, &entry)
            .await?;
        if let Some(ref output) = job.output {
            self.store
                .set_latest(&job.link_id, &job.extractor, output, entry.timestamp)
                .await?;
        }
        self.store.touch_link(&job.link_id, entry.timestamp).await?;
        info!("Job {} ({}) succeeded", job.id, job.extractor);
        Ok(Transition::moved(JobStatus::Started, JobStatus::Succeeded))
    }

    async fn finish_failure(
        &self,
        mut job: Job,
        error: ExtractorError,
        timeout: Duration,
        entry: HistoryEntry,
    ) -> ArchiveResult<Transition<JobStatus>> {
        let now = entry.timestamp;
        let retry = self.retry.allows_retry(&job, &error);
        if retry {
            job.enter_backoff(now, timeout, &error);
        } else {
            job.enter_failed(now, &error);
        }
        if !self.store.update_job(&job, JobStatus::Started).await? {
            return Ok(Transition::Lost);
        }
        self.store
            .append_history(&job.link_id, &job.extractor, &entry)
            .await?;
        self.store.touch_link(&job.link_id, now).await?;

        if retry {
            info!(
                "Job {} ({}) attempt {}/{} failed, retrying at {}: {}",
                job.id,
                job.extractor,
                job.retries,
                self.retry.max_retries,
                job.retry_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                error
            );
            Ok(Transition::moved(JobStatus::Started, JobStatus::Backoff))
        } else {
            warn!(
                "Job {} ({}) failed after {} attempt(s): {}\nHint: {}",
                job.id,
                job.extractor,
                job.retries,
                error,
                error.hint()
            );
            Ok(Transition::moved(JobStatus::Started, JobStatus::Failed))
        }
    }
}

fn failed_entry(
    job: &Job,
    error: &ExtractorError,
    at: DateTime<Utc>,
    duration_ms: u64,
) -> HistoryEntry {
    HistoryEntry {
        timestamp: at,
        status: HistoryStatus::Failed,
        duration_ms,
        cmd: job.cmd.clone(),
        cmd_version: job.cmd_version.clone(),
        output: None,
        error: Some(error.describe()),
    }
}

fn elapsed_ms(since: DateTime<Utc>) -> u64 {
    u64::try_from((Utc::now() - since).num_milliseconds()).unwrap_or(0)
}
