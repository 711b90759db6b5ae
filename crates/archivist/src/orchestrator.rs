//! Runs the job and link worker pools side by side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::WorkerSettings;
use crate::extractors::ExtractorRegistry;
use crate::lifecycle::{JobMachine, LinkMachine, RetryPolicy};
use crate::output::OutputLayout;
use crate::repository::ArchiveStore;
use crate::work_queue::{JobQueue, LinkQueue, PoolConfig, PoolStats, WorkQueueError, WorkerPool};

/// What a run accomplished and what is left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub jobs: PoolStats,
    pub links: PoolStats,
    pub pending_links: usize,
    pub pending_jobs: usize,
}

impl RunReport {
    /// Every link sealed and every job terminal.
    pub fn settled(&self) -> bool {
        self.pending_links == 0 && self.pending_jobs == 0
    }
}

pub struct Orchestrator {
    store: Arc<dyn ArchiveStore>,
    jobs: WorkerPool<JobQueue>,
    links: WorkerPool<LinkQueue>,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        registry: Arc<ExtractorRegistry>,
        layout: OutputLayout,
        salt: impl Into<String>,
        workers: &WorkerSettings,
        retry: RetryPolicy,
    ) -> Self {
        let job_machine = JobMachine::new(
            store.clone(),
            registry.clone(),
            layout.clone(),
            retry,
            workers.job_tick_grace,
        );
        let link_machine = LinkMachine::new(
            store.clone(),
            registry,
            layout,
            salt,
            workers.link_poll_interval,
        );

        let jobs = WorkerPool::new(
            Arc::new(JobQueue::new(store.clone(), job_machine)),
            PoolConfig {
                actors: workers.job_actors,
                batch_size: workers.batch_size,
                poll_interval: workers.poll_interval,
            },
        );
        let links = WorkerPool::new(
            Arc::new(LinkQueue::new(
                store.clone(),
                link_machine,
                workers.link_tick_budget,
            )),
            PoolConfig {
                actors: workers.link_actors,
                batch_size: workers.batch_size,
                poll_interval: workers.poll_interval,
            },
        );

        Self {
            store,
            jobs,
            links,
            poll_interval: workers.poll_interval,
        }
    }

    /// Run both pools until `shutdown` flips to true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunReport, WorkQueueError> {
        let (jobs, links) = tokio::join!(self.jobs.run(shutdown.clone()), self.links.run(shutdown));
        let (pending_links, pending_jobs) = self.store.pending_counts().await?;
        Ok(RunReport {
            jobs,
            links,
            pending_links,
            pending_jobs,
        })
    }

    /// Keep processing until nothing is pending or `deadline` passes.
    ///
    /// Backoff delays are waited out, so this can take a while when
    /// extractors keep failing; `deadline` bounds it.
    pub async fn run_until_idle(&self, deadline: Duration) -> Result<RunReport, WorkQueueError> {
        let started = Instant::now();
        let mut report = RunReport::default();

        loop {
            let links = self.links.run_until_idle().await?;
            let jobs = self.jobs.run_until_idle().await?;
            report.links.merge(links);
            report.jobs.merge(jobs);

            let (pending_links, pending_jobs) = self.store.pending_counts().await?;
            report.pending_links = pending_links;
            report.pending_jobs = pending_jobs;
            if report.settled() {
                info!("All links sealed");
                break;
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                info!(
                    "Stopping with {} link(s) and {} job(s) still pending",
                    pending_links, pending_jobs
                );
                break;
            }
            if links.claimed + jobs.claimed == 0 {
                debug!(
                    "Nothing due; {} link(s), {} job(s) waiting",
                    pending_links, pending_jobs
                );
                tokio::time::sleep(self.poll_interval.min(deadline - elapsed)).await;
            }
        }
        Ok(report)
    }
}
