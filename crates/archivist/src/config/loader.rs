//! Settings resolution: config file, `--data` override, then environment.

use std::path::{Path, PathBuf};

use super::{Config, Settings};

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (`--data` flag).
    pub data: Option<PathBuf>,
}

/// Look for `archivist.{ext}` or `config.{ext}` inside a data directory.
fn find_config_in_data_dir(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["toml", "yaml", "yml", "json"];
    let basenames = ["archivist", "config"];

    for basename in basenames {
        for ext in extensions {
            let path = data_dir.join(format!("{}.{}", basename, ext));
            if path.exists() {
                return Some(path);
            }
        }
    }
    None
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

async fn load_file_config(options: &LoadOptions, data_dir: Option<&PathBuf>) -> Config {
    // Priority 1: explicit --config
    if let Some(ref config_path) = options.config_path {
        return match Config::load_from_path(config_path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                Config::default()
            }
        };
    }

    // Priority 2: config inside the data dir
    if let Some(data_dir) = data_dir {
        if let Some(config_path) = find_config_in_data_dir(data_dir) {
            tracing::debug!("Found config in data dir: {}", config_path.display());
            if let Ok(config) = Config::load_from_path(&config_path).await {
                return config;
            }
        }
    }

    // Priority 3: auto-discover via prefer
    Config::load().await
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let data_dir_override = options.data.as_deref().map(absolute);
    let config = load_file_config(&options, data_dir_override.as_ref()).await;

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    // --data takes precedence over the config file
    if let Some(data_dir) = data_dir_override {
        settings.set_data_dir(data_dir);
    }

    // DATABASE_URL takes highest precedence
    if let Some(database_url) = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
        tracing::debug!("Using DATABASE_URL from environment: {}", database_url);
        settings.database_url = Some(database_url);
    }

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_data_dir_config_is_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("archivist.toml"), "max_retries = 7\n").unwrap();

        let (settings, config) = load_settings_with_options(LoadOptions {
            config_path: None,
            data: Some(dir.path().to_path_buf()),
        })
        .await;

        assert_eq!(settings.retry.max_retries, 7);
        assert_eq!(settings.data_dir, dir.path());
        assert!(config.source_path.is_some());
    }

    #[tokio::test]
    async fn test_explicit_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "data_dir: store\n").unwrap();

        let (settings, _) = load_settings_with_options(LoadOptions {
            config_path: Some(path),
            data: None,
        })
        .await;

        assert_eq!(settings.data_dir, dir.path().join("store"));
    }
}
