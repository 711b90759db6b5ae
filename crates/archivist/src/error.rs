//! Error types shared across the engine.

use std::time::Duration;

use thiserror::Error;

use crate::abid::{AbidParseError, ConflictReport};
use crate::repository::StoreError;

/// Why a single extractor attempt failed.
///
/// Each variant is either transient (the attempt may be retried) or
/// permanent (retrying cannot help).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractorError {
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("server error: {0}")]
    ServerError(String),
    #[error("forbidden (HTTP 403)")]
    Forbidden,
    #[error("not found (HTTP 404)")]
    NotFound,
    #[error("blocked by robots.txt")]
    RobotsDenied,
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),
    #[error("required binary '{tool}' is not installed")]
    BinaryMissing { tool: String },
    #[error("no extractor named '{0}' is enabled")]
    UnknownExtractor(String),
    #[error("dependency not ready: {0}")]
    DependencyNotReady(String),
    #[error("{tool} failed ({status})")]
    ExtractionFailed {
        tool: String,
        status: String,
        tail: String,
    },
    #[error("I/O error: {0}")]
    Io(String),
}

impl ExtractorError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::ConnectionFailed(_)
            | Self::RateLimited
            | Self::ServerError(_)
            | Self::DependencyNotReady(_)
            | Self::ExtractionFailed { .. }
            | Self::Io(_) => true,
            Self::Forbidden
            | Self::NotFound
            | Self::RobotsDenied
            | Self::UnsupportedContent(_)
            | Self::BinaryMissing { .. }
            | Self::UnknownExtractor(_) => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Suggested remediation for the operator.
    pub fn hint(&self) -> String {
        match self {
            Self::Timeout(_) => {
                "increase timeout_secs for this extractor if the site is slow".to_string()
            }
            Self::ConnectionFailed(_) => "check network connectivity and DNS".to_string(),
            Self::RateLimited => {
                "the site is throttling requests; lower worker concurrency".to_string()
            }
            Self::ServerError(_) => "the remote server failed; it is retried later".to_string(),
            Self::Forbidden => {
                "try changing the user agent (user_agent in config) or supplying cookies"
                    .to_string()
            }
            Self::NotFound => "check that the URL still exists".to_string(),
            Self::RobotsDenied => {
                "the site disallows crawlers; disable this extractor for it".to_string()
            }
            Self::UnsupportedContent(_) => {
                "this extractor cannot handle the content; disable it for such URLs".to_string()
            }
            Self::BinaryMissing { tool } => format!(
                "install '{}' or point extractors.<name>.binary at it",
                tool
            ),
            Self::UnknownExtractor(name) => format!(
                "enable extractors.{} in config, or rearchive with --only to drop it",
                name
            ),
            Self::DependencyNotReady(_) => {
                "waits for another extractor's output; retried automatically".to_string()
            }
            Self::ExtractionFailed { .. } => "inspect the tool output below".to_string(),
            Self::Io(_) => "check permissions and free space in the archive dir".to_string(),
        }
    }

    /// Captured tool output, if any.
    pub fn tail(&self) -> Option<&str> {
        match self {
            Self::ExtractionFailed { tail, .. } if !tail.is_empty() => Some(tail),
            _ => None,
        }
    }

    /// Full human-readable description: message, hint and output tail.
    pub fn describe(&self) -> String {
        let mut text = format!("{}\nHint: {}", self, self.hint());
        if let Some(tail) = self.tail() {
            text.push('\n');
            text.push_str(tail);
        }
        text
    }
}

/// Errors surfaced by the archive service and the state machines.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("identifier conflict: {0}")]
    IdentifierConflict(ConflictReport),
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] AbidParseError),
    #[error("link not found: {0}")]
    LinkNotFound(String),
    #[error("link {0} is still being archived")]
    InProgress(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
