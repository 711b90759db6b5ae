//! Per-link output directories and the sealed-link manifest.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::abid::Abid;
use crate::config::Settings;
use crate::extractors::{article_title, ExtractorKind};
use crate::models::{HistoryRecord, Job, Link};

pub const MANIFEST_FILENAME: &str = "index.json";

/// Where link artifacts live on disk and with what permissions.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    dir_mode: u32,
    file_mode: u32,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, dir_mode: u32, file_mode: u32) -> Self {
        Self {
            root: root.into(),
            dir_mode,
            file_mode,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.archive_dir, settings.dir_mode, settings.file_mode)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn link_dir(&self, id: &Abid) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Create `path` (and parents) with the configured directory mode.
    pub fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        if path.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(path)?;
        set_mode(path, self.dir_mode)
    }

    /// Write through a temp file and rename, so readers never see a partial file.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        set_mode(&tmp, self.file_mode)?;
        fs::rename(&tmp, path)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// One file under a link directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// Contents of `index.json`, written when a link seals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkManifest {
    pub link: Link,
    pub sealed_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
    pub latest: BTreeMap<String, String>,
    pub history: Vec<HistoryRecord>,
    pub files: Vec<ManifestFile>,
}

/// Hash every file under `dir` except the manifest itself, sorted by path.
///
/// Entries that cannot be walked or read are logged and left out.
pub fn collect_files(dir: &Path) -> Vec<ManifestFile> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return files;
    }
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(file) = describe_file(dir, entry.path()) {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn describe_file(dir: &Path, path: &Path) -> Option<ManifestFile> {
    let relative = path.strip_prefix(dir).ok()?;
    if relative == Path::new(MANIFEST_FILENAME) {
        return None;
    }
    match hash_file(path) {
        Ok((size, sha256)) => Some(ManifestFile {
            path: relative.to_string_lossy().replace('\\', "/"),
            size,
            sha256,
        }),
        Err(e) => {
            warn!("Skipping {} in manifest: {}", path.display(), e);
            None
        }
    }
}

fn hash_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok((size, hex::encode(hasher.finalize())))
}

/// Write `index.json` for a link that is about to seal.
pub fn write_manifest(layout: &OutputLayout, manifest: &LinkManifest) -> io::Result<PathBuf> {
    let path = layout.link_dir(&manifest.link.id).join(MANIFEST_FILENAME);
    let json = serde_json::to_vec_pretty(manifest).map_err(io::Error::other)?;
    layout.write(&path, &json)?;
    debug!("Wrote manifest {} ({} files)", path.display(), manifest.files.len());
    Ok(path)
}

fn title_tag() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok())
        .as_ref()
}

/// Best title from the artifacts: readability's article title, then the
/// DOM dump's `<title>`.
pub fn discover_title(link_dir: &Path) -> Option<String> {
    if let Some(title) = article_title(link_dir) {
        return Some(title);
    }
    let html = fs::read_to_string(link_dir.join(ExtractorKind::Dom.output_name())).ok()?;
    let raw = title_tag()?.captures(&html)?.get(1)?.as_str();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}
