//! Extractor doubles for unit tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{ExtractResult, Extractor};
use crate::models::Link;

/// Writes `<name>.txt` and succeeds.
pub(crate) struct Noop {
    name: String,
}

impl Noop {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Extractor for Noop {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.txt", self.name))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn run(&self, _link: &Link, out_dir: &Path, _timeout: Duration) -> ExtractResult {
        let path = self.output_path();
        let outcome = std::fs::write(out_dir.join(&path), b"ok")
            .map(|_| path)
            .map_err(|e| crate::error::ExtractorError::Io(e.to_string()));
        ExtractResult {
            cmd: vec![self.name.clone()],
            cmd_version: None,
            pwd: out_dir.to_path_buf(),
            outcome,
            duration: Duration::ZERO,
        }
    }
}
