//! Locating extractor tools on disk.
//!
//! Resolution (PATH lookup plus a `--version` probe) is cached for a TTL so
//! a tool installed while the engine runs is picked up without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ExtractorError;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A resolved tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryInfo {
    pub name: String,
    pub abspath: PathBuf,
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    resolved_at: Instant,
    info: Option<BinaryInfo>,
}

#[derive(Debug)]
pub struct BinaryResolver {
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl BinaryResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a binary by name or path.
    pub async fn resolve(&self, name: &str) -> Result<BinaryInfo, ExtractorError> {
        if let Some(entry) = self.cache.read().await.get(name) {
            if entry.resolved_at.elapsed() < self.ttl {
                return entry.info.clone().ok_or_else(|| ExtractorError::BinaryMissing {
                    tool: name.to_string(),
                });
            }
        }

        let info = probe(name).await;
        self.cache.write().await.insert(
            name.to_string(),
            CacheEntry {
                resolved_at: Instant::now(),
                info: info.clone(),
            },
        );
        info.ok_or_else(|| ExtractorError::BinaryMissing {
            tool: name.to_string(),
        })
    }

    /// Forget a cached resolution.
    pub async fn invalidate(&self, name: &str) {
        self.cache.write().await.remove(name);
    }
}

impl Default for BinaryResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

async fn probe(name: &str) -> Option<BinaryInfo> {
    let abspath = which::which(name).ok()?;
    let version = probe_version(&abspath).await;
    debug!(
        "Resolved {} -> {} ({})",
        name,
        abspath.display(),
        version.as_deref().unwrap_or("unknown version")
    );
    Some(BinaryInfo {
        name: name.to_string(),
        abspath,
        version,
    })
}

async fn probe_version(path: &Path) -> Option<String> {
    let child = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(VERSION_PROBE_TIMEOUT, child)
        .await
        .ok()?
        .ok()?;

    first_line(&output.stdout).or_else(|| first_line(&output.stderr))
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(128).collect())
}
