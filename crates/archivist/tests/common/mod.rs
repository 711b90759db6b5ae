//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use archivist::config::Settings;
use archivist::extractors::{ExtractResult, Extractor, ExtractorRegistry};
use archivist::models::Link;
use archivist::repository::{run_migrations, ArchiveStore, DieselStore, MemoryStore};
use archivist::{Archivist, ExtractorError};

/// Extractor that fails with a scripted sequence of errors, then writes
/// `<name>.txt` and succeeds.
pub struct Scripted {
    name: String,
    failures: Mutex<VecDeque<ExtractorError>>,
    delay: Duration,
    runs: AtomicUsize,
}

impl Scripted {
    pub fn ok(name: &str) -> Arc<Self> {
        Self::failing(name, vec![])
    }

    pub fn failing(name: &str, failures: Vec<ExtractorError>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failures: Mutex::new(failures.into()),
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failures: Mutex::new(VecDeque::new()),
            delay,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.txt", self.name))
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(20)
    }

    async fn run(&self, link: &Link, out_dir: &Path, _timeout: Duration) -> ExtractResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self.failures.lock().unwrap().pop_front();
        let outcome = match failure {
            Some(error) => Err(error),
            None => {
                let path = self.output_path();
                std::fs::write(out_dir.join(&path), link.url.as_bytes())
                    .map(|_| path)
                    .map_err(|e| ExtractorError::Io(e.to_string()))
            }
        };
        ExtractResult {
            cmd: vec![self.name.clone(), link.url.clone()],
            cmd_version: Some("1.0".into()),
            pwd: out_dir.to_path_buf(),
            outcome,
            duration: self.delay,
        }
    }
}

/// Settings tuned for fast test runs.
pub fn fast_settings(dir: &Path) -> Settings {
    let mut settings = Settings::with_data_dir(dir.to_path_buf());
    settings.abid_salt = Some("test-salt".into());
    settings.retry.max_retries = 3;
    settings.workers.job_actors = 4;
    settings.workers.link_actors = 2;
    settings.workers.poll_interval = Duration::from_millis(10);
    settings.workers.link_poll_interval = Duration::from_millis(20);
    settings.workers.job_tick_grace = Duration::from_secs(2);
    settings.workers.link_tick_budget = Duration::from_secs(5);
    settings
}

pub fn registry(extractors: Vec<Arc<Scripted>>) -> ExtractorRegistry {
    let mut registry = ExtractorRegistry::new();
    for extractor in extractors {
        registry.register(extractor);
    }
    registry
}

pub fn memory_archivist(settings: Settings, extractors: Vec<Arc<Scripted>>) -> Archivist {
    let store: Arc<dyn ArchiveStore> = Arc::new(MemoryStore::new());
    Archivist::with_store(settings, store, registry(extractors)).unwrap()
}

pub async fn sqlite_store(dir: &TempDir) -> Arc<dyn ArchiveStore> {
    let db = dir.path().join("index.sqlite3");
    run_migrations(&db.display().to_string()).await.unwrap();
    Arc::new(DieselStore::from_path(&db))
}
