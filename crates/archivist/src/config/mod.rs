//! Configuration management using the prefer crate.
//!
//! A config file (TOML, YAML or JSON) is discovered by prefer or given
//! explicitly, parsed with serde, then applied on top of [`Settings`]
//! defaults.

mod loader;
mod settings;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use loader::{load_settings_with_options, LoadOptions};
pub use settings::{RetrySettings, Settings, WorkerSettings};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "index.sqlite3";

/// Per-extractor overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Binary name or absolute path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// Extra arguments inserted before the URL.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_actors: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_actors: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_tick_grace_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_tick_budget_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_poll_interval_secs: Option<u64>,
}

impl WorkersConfig {
    fn apply(&self, workers: &mut WorkerSettings) {
        if let Some(n) = self.job_actors {
            workers.job_actors = n.max(1);
        }
        if let Some(n) = self.link_actors {
            workers.link_actors = n.max(1);
        }
        if let Some(n) = self.batch_size {
            workers.batch_size = n.max(1);
        }
        if let Some(ms) = self.poll_interval_ms {
            workers.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.job_tick_grace_secs {
            workers.job_tick_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = self.link_tick_budget_secs {
            workers.link_tick_budget = Duration::from_secs(secs);
        }
        if let Some(secs) = self.link_poll_interval_secs {
            workers.link_poll_interval = Duration::from_secs(secs);
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename (joined with data_dir) or `sqlite:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Identifier salt shared by installs that should agree on identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abid_salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Octal permission bits for created directories, e.g. "755".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_mode: Option<String>,
    /// Octal permission bits for written files, e.g. "644".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extractors: BTreeMap<String, ExtractorConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    pub async fn load() -> Self {
        match prefer::load("archivist").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring unreadable config: {}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// The config file's directory, for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.set_data_dir(self.resolve_path(data_dir, base_dir));
        }
        if let Some(ref database) = self.database {
            if database.starts_with("sqlite:") {
                settings.database_url = Some(database.clone());
            } else {
                settings.database_filename = database.clone();
            }
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(ref salt) = self.abid_salt {
            settings.abid_salt = Some(salt.clone());
        }
        if let Some(max_retries) = self.max_retries {
            settings.retry.max_retries = max_retries.max(1);
        }
        if let Some(mode) = self.dir_mode.as_deref().and_then(parse_mode) {
            settings.dir_mode = mode;
        }
        if let Some(mode) = self.file_mode.as_deref().and_then(parse_mode) {
            settings.file_mode = mode;
        }
        if let Some(secs) = self.binary_cache_ttl_secs {
            settings.binary_cache_ttl = Duration::from_secs(secs);
        }
        self.workers.apply(&mut settings.workers);
        for (name, extractor) in &self.extractors {
            settings.extractors.insert(name.clone(), extractor.clone());
        }
    }
}

fn parse_mode(s: &str) -> Option<u32> {
    match u32::from_str_radix(s.trim().trim_start_matches("0o"), 8) {
        Ok(mode) if mode <= 0o7777 => Some(mode),
        _ => {
            tracing::error!("Invalid permission mode in config: '{}'", s);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archivist.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "./data"
max_retries = 5
dir_mode = "750"

[workers]
job_actors = 8
link_poll_interval_secs = 2

[extractors.media]
enabled = false

[extractors.pdf]
timeout_secs = 30
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, &config.base_dir().unwrap());

        assert_eq!(settings.data_dir, dir.path().join("./data"));
        assert_eq!(settings.archive_dir, dir.path().join("./data").join("archive"));
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.dir_mode, 0o750);
        assert_eq!(settings.workers.job_actors, 8);
        assert_eq!(settings.workers.link_poll_interval, Duration::from_secs(2));
        assert!(!settings.extractor_enabled("media"));
        assert!(settings.extractor_enabled("wget"));
    }

    #[tokio::test]
    async fn test_load_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("archivist.yaml");
        std::fs::write(&yaml, "user_agent: test-agent\nabid_salt: s1\n").unwrap();
        let config = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(config.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(config.abid_salt.as_deref(), Some("s1"));

        let json = dir.path().join("archivist.json");
        std::fs::write(&json, r#"{"database": "sqlite:/tmp/x.db"}"#).unwrap();
        let config = Config::load_from_path(&json).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, dir.path());
        assert_eq!(settings.database_url(), "sqlite:/tmp/x.db");
    }

    #[tokio::test]
    async fn test_bad_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archivist.toml");
        std::fs::write(&path, "workers = 3").unwrap();
        assert!(Config::load_from_path(&path).await.is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755"), Some(0o755));
        assert_eq!(parse_mode("0o700"), Some(0o700));
        assert_eq!(parse_mode("999"), None);
    }
}
