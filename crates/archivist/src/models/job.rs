//! Job model: one extractor run against one link.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{to_chrono, Link};
use crate::abid::{derive, new_tie_break, Abid, AbidSource};
use crate::error::ExtractorError;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    /// Waiting for `retry_at` after a transient failure.
    Backoff,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Backoff => "backoff",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "started" => Some(Self::Started),
            "backoff" => Some(Self::Backoff),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Started)
                | (Started, Succeeded)
                | (Started, Backoff)
                | (Started, Failed)
                | (Backoff, Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay before the next attempt: linear in the attempt count.
pub fn backoff_delay(timeout: Duration, retries: u32) -> Duration {
    timeout.saturating_mul(retries.max(1))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Abid,
    pub link_id: Abid,
    pub extractor: String,
    pub status: JobStatus,
    /// Attempts started so far.
    pub retries: u32,
    pub cmd: Vec<String>,
    pub cmd_version: Option<String>,
    pub pwd: Option<String>,
    /// Artifact path relative to the link's output directory.
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
    pub tie_break: String,
}

impl Job {
    /// Create a queued job for `extractor` against `link`, due immediately.
    pub fn new(link: &Link, extractor: impl Into<String>, salt: &str, now: DateTime<Utc>) -> Self {
        let extractor = extractor.into();
        let tie_break = new_tie_break();
        Self {
            id: derive(
                Self::PREFIX,
                now,
                link.id.as_str(),
                &extractor,
                &tie_break,
                salt,
            ),
            link_id: link.id.clone(),
            extractor,
            status: JobStatus::Queued,
            retries: 0,
            cmd: Vec::new(),
            cmd_version: None,
            pwd: None,
            output: None,
            error: None,
            created_at: now,
            start_ts: None,
            end_ts: None,
            retry_at: Some(now),
            tie_break,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.retry_at.is_some_and(|at| at <= now)
    }

    /// A lease past its `retry_at` on a started job means the attempt was abandoned.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Started && self.is_due(now)
    }

    pub fn enter_queued(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.retry_at = Some(now);
        self.start_ts = None;
        self.output = None;
        self.error = None;
    }

    /// Begin an attempt, holding a lease of `lease` on the row.
    pub fn enter_started(&mut self, now: DateTime<Utc>, lease: Duration) {
        self.status = JobStatus::Started;
        self.retries += 1;
        self.start_ts = Some(now);
        self.end_ts = None;
        self.retry_at = Some(now + to_chrono(lease));
    }

    pub fn enter_backoff(&mut self, now: DateTime<Utc>, timeout: Duration, error: &ExtractorError) {
        self.status = JobStatus::Backoff;
        self.retry_at = Some(now + to_chrono(backoff_delay(timeout, self.retries)));
        self.end_ts = None;
        self.error = Some(error.describe());
    }

    pub fn enter_succeeded(&mut self, now: DateTime<Utc>, output: Option<String>) {
        self.status = JobStatus::Succeeded;
        self.retry_at = None;
        self.end_ts = Some(now);
        self.output = output;
        self.error = None;
    }

    pub fn enter_failed(&mut self, now: DateTime<Utc>, error: &ExtractorError) {
        self.status = JobStatus::Failed;
        self.retry_at = None;
        self.end_ts = Some(now);
        self.error = Some(error.describe());
    }

    /// Record how the latest attempt was invoked.
    pub fn record_command(
        &mut self,
        cmd: Vec<String>,
        cmd_version: Option<String>,
        pwd: Option<String>,
    ) {
        self.cmd = cmd;
        self.cmd_version = cmd_version;
        self.pwd = pwd;
    }

    /// Operator-requested re-run: back to queued with a fresh retry budget.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.enter_queued(now);
        self.retries = 0;
        self.end_ts = None;
    }
}

impl AbidSource for Job {
    const PREFIX: &'static str = "job";

    fn abid_ts_src(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn abid_uri_src(&self) -> String {
        self.link_id.to_string()
    }

    fn abid_subtype_src(&self) -> String {
        self.extractor.clone()
    }

    fn abid_rand_src(&self) -> String {
        self.tie_break.clone()
    }

    fn stored_abid(&self) -> &Abid {
        &self.id
    }
}
