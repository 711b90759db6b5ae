//! Worker pool: poll a queue, claim, and tick items with bounded concurrency.
//!
//! Each tick runs in its own task under a wall-clock budget. A tick that
//! overruns is dropped (killing any tool it spawned); its row's lease then
//! expires and the row comes back through the normal poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use super::{WorkQueue, WorkQueueError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum concurrent ticks.
    pub actors: usize,
    /// Due rows fetched per poll.
    pub batch_size: usize,
    /// Sleep between polls when nothing was dispatched.
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            actors: 4,
            batch_size: 32,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Counters for one pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub claimed: usize,
    pub lost: usize,
    pub completed: usize,
    pub errored: usize,
    pub timed_out: usize,
}

impl PoolStats {
    pub fn merge(&mut self, other: PoolStats) {
        self.claimed += other.claimed;
        self.lost += other.lost;
        self.completed += other.completed;
        self.errored += other.errored;
        self.timed_out += other.timed_out;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickReport {
    Completed,
    Lost,
    Errored,
    TimedOut,
}

pub struct WorkerPool<Q: WorkQueue> {
    queue: Arc<Q>,
    config: PoolConfig,
    worker_id: String,
}

/// Tasks in flight plus the item key each one is working on.
struct InFlight {
    tasks: JoinSet<TickReport>,
    keys: HashMap<Id, String>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            keys: HashMap::new(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.values().any(|k| k == key)
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn record(&mut self, stats: &mut PoolStats, worker_id: &str, joined: Result<(Id, TickReport), tokio::task::JoinError>) {
        match joined {
            Ok((id, report)) => {
                self.keys.remove(&id);
                match report {
                    TickReport::Completed => {
                        stats.claimed += 1;
                        stats.completed += 1;
                    }
                    TickReport::Lost => stats.lost += 1,
                    TickReport::Errored => {
                        stats.claimed += 1;
                        stats.errored += 1;
                    }
                    TickReport::TimedOut => {
                        stats.claimed += 1;
                        stats.timed_out += 1;
                    }
                }
            }
            Err(e) => {
                let key = self.keys.remove(&e.id()).unwrap_or_default();
                error!("[{}] tick for {} panicked or was cancelled: {}", worker_id, key, e);
                stats.errored += 1;
            }
        }
    }

    /// Collect whatever has already finished.
    fn reap(&mut self, stats: &mut PoolStats, worker_id: &str) {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.record(stats, worker_id, joined);
        }
    }

    async fn drain(&mut self, stats: &mut PoolStats, worker_id: &str) {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.record(stats, worker_id, joined);
        }
    }
}

impl<Q: WorkQueue> WorkerPool<Q> {
    pub fn new(queue: Arc<Q>, config: PoolConfig) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let worker_id = format!("{}:{}:{}", host, std::process::id(), queue.name());
        Self {
            queue,
            config,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Fetch one batch and spawn a tick per item not already in flight.
    ///
    /// Waits for a free slot before each spawn, so at most `actors` ticks run.
    async fn dispatch(
        &self,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut InFlight,
        stats: &mut PoolStats,
    ) -> Result<usize, WorkQueueError> {
        let limit = self.config.batch_size.max(1);
        let items = self.queue.fetch_due(Utc::now(), limit).await?;
        let mut dispatched = 0;

        for item in items {
            let key = self.queue.key(&item);
            if in_flight.contains(&key) {
                continue;
            }
            let permit = loop {
                match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => break permit,
                    Err(_) => match in_flight.tasks.join_next_with_id().await {
                        Some(joined) => in_flight.record(stats, &self.worker_id, joined),
                        None => {
                            // Nothing to wait on; the semaphore only
                            // tracks our own tasks, so this cannot persist.
                            tokio::task::yield_now().await;
                        }
                    },
                }
            };

            let queue = self.queue.clone();
            let worker_id = self.worker_id.clone();
            let task_key = key.clone();
            let handle = in_flight.tasks.spawn(async move {
                let _permit = permit;
                tick(queue, item, &task_key, &worker_id).await
            });
            in_flight.keys.insert(handle.id(), key);
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Run until `shutdown` flips to true, then wait for in-flight ticks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> PoolStats {
        let semaphore = Arc::new(Semaphore::new(self.config.actors.max(1)));
        let mut in_flight = InFlight::new();
        let mut stats = PoolStats::default();
        info!(
            "[{}] worker pool started ({} actors)",
            self.worker_id, self.config.actors
        );

        while !*shutdown.borrow() {
            let dispatched = match self.dispatch(&semaphore, &mut in_flight, &mut stats).await {
                Ok(n) => n,
                Err(e) => {
                    warn!("[{}] poll failed: {}", self.worker_id, e);
                    0
                }
            };
            in_flight.reap(&mut stats, &self.worker_id);

            if dispatched == 0 {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(
            "[{}] shutting down, waiting for {} tick(s)",
            self.worker_id,
            in_flight.keys.len()
        );
        in_flight.drain(&mut stats, &self.worker_id).await;
        stats
    }

    /// Process everything due right now, including rows that become due
    /// while doing so, then return.
    pub async fn run_until_idle(&self) -> Result<PoolStats, WorkQueueError> {
        let semaphore = Arc::new(Semaphore::new(self.config.actors.max(1)));
        let mut in_flight = InFlight::new();
        let mut stats = PoolStats::default();

        loop {
            let dispatched = self.dispatch(&semaphore, &mut in_flight, &mut stats).await?;
            if dispatched == 0 {
                if in_flight.is_empty() {
                    break;
                }
                // Wait for one tick; it may make more rows due.
                if let Some(joined) = in_flight.tasks.join_next_with_id().await {
                    in_flight.record(&mut stats, &self.worker_id, joined);
                }
            }
            in_flight.reap(&mut stats, &self.worker_id);
        }
        Ok(stats)
    }
}

async fn tick<Q: WorkQueue>(queue: Arc<Q>, item: Q::Item, key: &str, worker_id: &str) -> TickReport {
    let budget = queue.tick_budget(&item);
    let handle = match queue.claim(item, Utc::now()).await {
        Ok(handle) => handle,
        Err(WorkQueueError::ClaimLost) => {
            debug!("[{}] claim on {} lost", worker_id, key);
            return TickReport::Lost;
        }
        Err(e) => {
            warn!("[{}] claim on {} failed: {}", worker_id, key, e);
            return TickReport::Errored;
        }
    };

    match tokio::time::timeout(budget, queue.process(handle)).await {
        Ok(Ok(())) => TickReport::Completed,
        Ok(Err(WorkQueueError::ClaimLost)) => TickReport::Lost,
        Ok(Err(e)) => {
            warn!("[{}] tick on {} failed: {}", worker_id, key, e);
            TickReport::Errored
        }
        Err(_) => {
            warn!(
                "[{}] tick on {} exceeded its {}s budget; abandoned until its lease expires",
                worker_id,
                key,
                budget.as_secs()
            );
            TickReport::TimedOut
        }
    }
}
