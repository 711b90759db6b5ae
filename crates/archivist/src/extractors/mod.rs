//! Extractors: one external tool each, producing one artifact per link.
//!
//! An [`Extractor`] decides whether it should run for a link and, if so,
//! runs its tool inside the link's output directory. Orchestration
//! (retries, history, state) lives in [`crate::lifecycle`]; extractors only
//! report what happened.

mod archive_org;
mod chrome;
mod favicon;
mod media;
mod readability;
mod singlefile;
#[cfg(test)]
pub(crate) mod test_support;
mod wget;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use url::Url;

use crate::binaries::BinaryResolver;
use crate::config::Settings;
use crate::error::ExtractorError;
use crate::models::Link;
use crate::runner::{self, artifact_present, CommandSpec, RunOutput};

pub use archive_org::ArchiveOrgExtractor;
pub use chrome::{ChromeExtractor, ChromeMode};
pub use favicon::FaviconExtractor;
pub use media::MediaExtractor;
pub use readability::ReadabilityExtractor;
pub use singlefile::SingleFileExtractor;
pub use wget::MirrorExtractor;

pub(crate) use readability::article_title;

/// The builtin extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtractorKind {
    Mirror,
    Pdf,
    Screenshot,
    Dom,
    ArchiveOrg,
    Favicon,
    Media,
    Readability,
    SingleFile,
}

impl ExtractorKind {
    /// Registration order. Readability comes after Dom, whose output it reads.
    pub const ALL: [ExtractorKind; 9] = [
        ExtractorKind::Favicon,
        ExtractorKind::Mirror,
        ExtractorKind::SingleFile,
        ExtractorKind::Pdf,
        ExtractorKind::Screenshot,
        ExtractorKind::Dom,
        ExtractorKind::Readability,
        ExtractorKind::Media,
        ExtractorKind::ArchiveOrg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mirror => "wget",
            Self::Pdf => "pdf",
            Self::Screenshot => "screenshot",
            Self::Dom => "dom",
            Self::ArchiveOrg => "archive_org",
            Self::Favicon => "favicon",
            Self::Media => "media",
            Self::Readability => "readability",
            Self::SingleFile => "singlefile",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Artifact path relative to the link directory.
    pub fn output_name(&self) -> &'static str {
        match self {
            Self::Mirror => "wget",
            Self::Pdf => "output.pdf",
            Self::Screenshot => "screenshot.png",
            Self::Dom => "output.html",
            Self::ArchiveOrg => "archive.org.txt",
            Self::Favicon => "favicon.ico",
            Self::Media => "media",
            Self::Readability => "readability",
            Self::SingleFile => "singlefile.html",
        }
    }

    pub fn default_binary(&self) -> &'static str {
        match self {
            Self::Mirror => "wget",
            Self::Pdf | Self::Screenshot | Self::Dom => "chromium",
            Self::ArchiveOrg | Self::Favicon => "curl",
            Self::Media => "yt-dlp",
            Self::Readability => "readability-extractor",
            Self::SingleFile => "single-file",
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Mirror | Self::Media => Duration::from_secs(120),
            _ => Duration::from_secs(60),
        }
    }
}

/// Resolved invocation settings for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub binary: String,
    pub timeout: Duration,
    pub extra_args: Vec<String>,
    pub user_agent: String,
}

/// Outcome of one extractor run.
#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub cmd: Vec<String>,
    pub cmd_version: Option<String>,
    pub pwd: PathBuf,
    /// Artifact path (relative to the link dir) or the failure.
    pub outcome: Result<PathBuf, ExtractorError>,
    pub duration: Duration,
}

impl ExtractResult {
    /// A failure that happened before any command ran.
    pub fn failed(pwd: &Path, error: ExtractorError) -> Self {
        Self {
            cmd: Vec::new(),
            cmd_version: None,
            pwd: pwd.to_path_buf(),
            outcome: Err(error),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name used for jobs, history and configuration.
    fn name(&self) -> &str;

    /// Artifact path relative to the link's output directory.
    fn output_path(&self) -> PathBuf;

    fn timeout(&self) -> Duration;

    /// Whether this extractor makes sense for the link at all.
    fn applies_to(&self, _link: &Link) -> bool {
        true
    }

    /// Run unless not applicable or (without `overwrite`) the artifact exists.
    fn should_run(&self, link: &Link, out_dir: &Path, overwrite: bool) -> bool {
        self.applies_to(link) && (overwrite || !artifact_present(&out_dir.join(self.output_path())))
    }

    /// Run the tool in `out_dir`. Never panics on tool failure; the error is
    /// carried in [`ExtractResult::outcome`].
    async fn run(&self, link: &Link, out_dir: &Path, timeout: Duration) -> ExtractResult;
}

/// The set of enabled extractors, in run order.
#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builtin extractors enabled in `settings`.
    pub fn from_settings(settings: &Settings, resolver: Arc<BinaryResolver>) -> Self {
        let mut registry = Self::new();
        for kind in ExtractorKind::ALL {
            if !settings.extractor_enabled(kind.as_str()) {
                tracing::debug!("Extractor {} disabled by configuration", kind.as_str());
                continue;
            }
            let tool = settings.tool_config(kind);
            let resolver = resolver.clone();
            let extractor: Arc<dyn Extractor> = match kind {
                ExtractorKind::Mirror => Arc::new(MirrorExtractor::new(tool, resolver)),
                ExtractorKind::Pdf => Arc::new(ChromeExtractor::new(ChromeMode::Pdf, tool, resolver)),
                ExtractorKind::Screenshot => {
                    Arc::new(ChromeExtractor::new(ChromeMode::Screenshot, tool, resolver))
                }
                ExtractorKind::Dom => Arc::new(ChromeExtractor::new(ChromeMode::Dom, tool, resolver)),
                ExtractorKind::ArchiveOrg => Arc::new(ArchiveOrgExtractor::new(tool, resolver)),
                ExtractorKind::Favicon => Arc::new(FaviconExtractor::new(tool, resolver)),
                ExtractorKind::Media => Arc::new(MediaExtractor::new(tool, resolver)),
                ExtractorKind::Readability => Arc::new(ReadabilityExtractor::new(tool, resolver)),
                ExtractorKind::SingleFile => Arc::new(SingleFileExtractor::new(tool, resolver)),
            };
            registry.register(extractor);
        }
        registry
    }

    /// Add an extractor, replacing any with the same name.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.retain(|e| e.name() != extractor.name());
        self.extractors.push(extractor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors.iter().find(|e| e.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.extractors.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }
}

/// Extensions served by scripts; the URL is still a page.
const DYNAMIC_EXTENSIONS: [&str; 8] = ["php", "asp", "aspx", "jsp", "cgi", "shtml", "pl", "cfm"];

/// Whether the URL points at a plain file rather than an HTML page.
///
/// Browser-based extractors skip these; a PDF or image needs no rendering.
pub fn is_static_file(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path();
    let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if DYNAMIC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return false;
    }
    match mime_guess::from_ext(ext).first() {
        Some(mime) => !matches!(mime.essence_str(), "text/html" | "application/xhtml+xml"),
        None => false,
    }
}

/// Common plumbing for tool-backed extractors: resolve, run, classify.
pub(crate) struct Invocation {
    pub cmd: Vec<String>,
    pub cmd_version: Option<String>,
    pub output: Result<RunOutput, ExtractorError>,
    pub elapsed: Duration,
}

impl Invocation {
    /// Combine with an artifact check into an [`ExtractResult`].
    pub fn finish(self, out_dir: &Path, outcome: Result<PathBuf, ExtractorError>) -> ExtractResult {
        ExtractResult {
            cmd: self.cmd,
            cmd_version: self.cmd_version,
            pwd: out_dir.to_path_buf(),
            outcome,
            duration: self.elapsed,
        }
    }
}

/// Resolve `config.binary` and run it with `args` (plus `extra_args`) in `out_dir`.
///
/// `output` carries the classified result: `Ok` only for a clean exit.
pub(crate) async fn invoke(
    resolver: &BinaryResolver,
    config: &ToolConfig,
    out_dir: &Path,
    args: Vec<String>,
    stdout_path: Option<PathBuf>,
    timeout: Duration,
) -> Invocation {
    let started = Instant::now();
    let binary = match resolver.resolve(&config.binary).await {
        Ok(binary) => binary,
        Err(e) => {
            return Invocation {
                cmd: vec![config.binary.clone()],
                cmd_version: None,
                output: Err(e),
                elapsed: started.elapsed(),
            }
        }
    };

    let mut spec = CommandSpec::new(&binary.abspath, out_dir)
        .args(config.extra_args.iter().cloned())
        .args(args);
    if let Some(path) = stdout_path {
        spec = spec.stdout_to(path);
    }

    let output = match runner::run_command(&spec, timeout).await {
        Ok(output) => runner::classify(&output, timeout).map(|_| output),
        Err(e) => Err(e),
    };

    Invocation {
        cmd: spec.argv(),
        cmd_version: binary.version,
        output,
        elapsed: started.elapsed(),
    }
}

/// Artifact check shared by extractors with a single fixed output.
pub(crate) fn expect_artifact(
    tool: &str,
    out_dir: &Path,
    relative: &str,
) -> Result<PathBuf, ExtractorError> {
    if artifact_present(&out_dir.join(relative)) {
        Ok(PathBuf::from(relative))
    } else {
        Err(ExtractorError::ExtractionFailed {
            tool: tool.to_string(),
            status: "exit code 0".to_string(),
            tail: format!("{} was not produced", relative),
        })
    }
}
