//! Per-extractor attempt history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abid::Abid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Skipped,
    Succeeded,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "skipped" => Some(Self::Skipped),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One attempt (or skip) of one extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub status: HistoryStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn skipped(timestamp: DateTime<Utc>, output: Option<String>) -> Self {
        Self {
            timestamp,
            status: HistoryStatus::Skipped,
            duration_ms: 0,
            cmd: Vec::new(),
            cmd_version: None,
            output,
            error: None,
        }
    }
}

/// A history entry together with the link and extractor it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub link_id: Abid,
    pub extractor: String,
    #[serde(flatten)]
    pub entry: HistoryEntry,
}
