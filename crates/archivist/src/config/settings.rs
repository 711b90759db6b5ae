//! Resolved runtime settings.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use super::{ExtractorConfig, DEFAULT_DATABASE_FILENAME};
use crate::extractors::{ExtractorKind, ToolConfig};

/// Archive output subdirectory name.
const ARCHIVE_SUBDIR: &str = "archive";

/// File holding the install's identifier salt.
const SALT_FILENAME: &str = ".abid_salt";

/// Worker pool tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Concurrent job ticks.
    pub job_actors: usize,
    /// Concurrent link ticks.
    pub link_actors: usize,
    /// Due rows fetched per poll.
    pub batch_size: usize,
    /// Sleep between polls when nothing is due.
    pub poll_interval: Duration,
    /// Slack added to an extractor timeout for a job tick's budget and lease.
    pub job_tick_grace: Duration,
    /// Budget (and lease) for one link tick.
    pub link_tick_budget: Duration,
    /// How long a started link waits before re-checking its jobs.
    pub link_poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            job_actors: 4,
            link_actors: 2,
            batch_size: 32,
            poll_interval: Duration::from_secs(1),
            job_tick_grace: Duration::from_secs(30),
            link_tick_budget: Duration::from_secs(60),
            link_poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    /// Attempts a job may start before a transient failure becomes final.
    pub max_retries: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Per-link output directories live here.
    pub archive_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Explicit database URL (overrides data_dir/database_filename).
    pub database_url: Option<String>,
    /// User agent passed to extractor tools.
    pub user_agent: String,
    /// Identifier salt; read from or written to `data_dir/.abid_salt` when unset.
    pub abid_salt: Option<String>,
    pub workers: WorkerSettings,
    pub retry: RetrySettings,
    /// Per-extractor overrides keyed by extractor name.
    pub extractors: BTreeMap<String, ExtractorConfig>,
    /// Permission bits for created directories.
    pub dir_mode: u32,
    /// Permission bits for written files.
    pub file_mode: u32,
    /// How long a resolved binary path stays cached.
    pub binary_cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        // Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("archivist");

        Self {
            archive_dir: data_dir.join(ARCHIVE_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            user_agent: format!(
                "Mozilla/5.0 (compatible; archivist/{})",
                env!("CARGO_PKG_VERSION")
            ),
            abid_salt: None,
            workers: WorkerSettings::default(),
            retry: RetrySettings::default(),
            extractors: BTreeMap::new(),
            dir_mode: 0o755,
            file_mode: 0o644,
            binary_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            archive_dir: data_dir.join(ARCHIVE_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    /// Point `data_dir` (and the archive dir under it) somewhere else.
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.archive_dir = data_dir.join(ARCHIVE_SUBDIR);
        self.data_dir = data_dir;
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        match self.database_url {
            Some(ref url) => url.clone(),
            None => format!("sqlite:{}", self.database_path().display()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn database_exists(&self) -> bool {
        self.database_url.is_some() || self.database_path().exists()
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> io::Result<()> {
        for dir in [&self.data_dir, &self.archive_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// Identifier salt: configured value, else the persisted one, else a new one.
    ///
    /// The salt must stay stable for the life of an archive, so a generated
    /// salt is written to `data_dir` before it is returned.
    pub fn resolve_salt(&self) -> io::Result<String> {
        if let Some(ref salt) = self.abid_salt {
            return Ok(salt.clone());
        }

        let path = self.data_dir.join(SALT_FILENAME);
        match fs::read_to_string(&path) {
            Ok(existing) if !existing.trim().is_empty() => return Ok(existing.trim().to_string()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        fs::create_dir_all(&self.data_dir)?;
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &salt)?;
        fs::rename(&tmp, &path)?;
        info!("Generated new identifier salt at {}", path.display());
        Ok(salt)
    }

    /// Whether an extractor is enabled (all are unless switched off).
    pub fn extractor_enabled(&self, name: &str) -> bool {
        self.extractors
            .get(name)
            .and_then(|c| c.enabled)
            .unwrap_or(true)
    }

    /// Effective tool invocation settings for a builtin extractor.
    pub fn tool_config(&self, kind: ExtractorKind) -> ToolConfig {
        let overrides = self.extractors.get(kind.as_str());
        ToolConfig {
            binary: overrides
                .and_then(|c| c.binary.clone())
                .unwrap_or_else(|| kind.default_binary().to_string()),
            timeout: overrides
                .and_then(|c| c.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or_else(|| kind.default_timeout()),
            extra_args: overrides.map(|c| c.extra_args.clone()).unwrap_or_default(),
            user_agent: self.user_agent.clone(),
        }
    }
}
