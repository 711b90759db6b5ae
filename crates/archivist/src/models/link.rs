//! Link model: one URL submitted for archiving.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::to_chrono;
use crate::abid::{derive, new_tie_break, Abid, AbidSource};

const LINK_SUBTYPE: &str = "link";

/// Link lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Submitted; jobs not yet scheduled.
    Queued,
    /// Jobs scheduled; waiting for all of them to finish.
    Started,
    /// Every job reached a terminal state.
    Sealed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Sealed => "sealed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "started" => Some(Self::Started),
            "sealed" => Some(Self::Sealed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sealed)
    }

    /// Transitions the link worker may perform.
    pub fn can_transition_to(&self, next: LinkStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Started)
                | (Self::Started, Self::Started)
                | (Self::Started, Self::Sealed)
        )
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-submission knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOptions {
    /// Re-run extractors even when their artifact already exists.
    #[serde(default)]
    pub overwrite: bool,
    /// Restrict the run to these extractors (empty means all enabled).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub only: Vec<String>,
}

impl ArchiveOptions {
    pub fn wants(&self, extractor: &str) -> bool {
        self.only.is_empty() || self.only.iter().any(|name| name == extractor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: Abid,
    pub url: String,
    pub domain: String,
    pub tags: Vec<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: LinkStatus,
    pub retry_at: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    /// Random source of the identifier's tie-break component.
    pub tie_break: String,
    pub options: ArchiveOptions,
}

impl Link {
    /// Create a queued link, due immediately.
    pub fn new(
        url: impl Into<String>,
        domain: impl Into<String>,
        tags: Vec<String>,
        options: ArchiveOptions,
        salt: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        let tie_break = new_tie_break();
        Self {
            id: derive(Self::PREFIX, now, &url, LINK_SUBTYPE, &tie_break, salt),
            url,
            domain: domain.into(),
            tags: normalize_tags(tags),
            title: None,
            created_at: now,
            status: LinkStatus::Queued,
            retry_at: Some(now),
            end_ts: None,
            tie_break,
            options,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.retry_at.is_some_and(|at| at <= now)
    }

    /// Jobs are scheduled; re-check completion after `poll`.
    pub fn enter_started(&mut self, now: DateTime<Utc>, poll: Duration) {
        self.status = LinkStatus::Started;
        self.retry_at = Some(now + to_chrono(poll));
    }

    /// Some jobs are still running; stay started and look again later.
    pub fn wait_for_jobs(&mut self, now: DateTime<Utc>, poll: Duration) {
        self.retry_at = Some(now + to_chrono(poll));
    }

    pub fn enter_sealed(&mut self, now: DateTime<Utc>) {
        self.status = LinkStatus::Sealed;
        self.retry_at = None;
        self.end_ts = Some(now);
    }

    /// Operator-requested re-archive of a sealed link.
    ///
    /// Not a worker transition: sealed links are never reopened by the engine.
    pub fn reopen(&mut self, now: DateTime<Utc>, overwrite: bool) {
        self.status = LinkStatus::Queued;
        self.retry_at = Some(now);
        self.end_ts = None;
        self.options.overwrite = overwrite;
    }

    /// Merge tags into the existing set, keeping order and dropping duplicates.
    pub fn merge_tags(&mut self, tags: impl IntoIterator<Item = String>) -> bool {
        let before = self.tags.len();
        let mut merged = std::mem::take(&mut self.tags);
        merged.extend(tags);
        self.tags = normalize_tags(merged);
        self.tags.len() != before
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

impl AbidSource for Link {
    const PREFIX: &'static str = "lnk";

    fn abid_ts_src(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn abid_uri_src(&self) -> String {
        self.url.clone()
    }

    fn abid_subtype_src(&self) -> String {
        LINK_SUBTYPE.to_string()
    }

    fn abid_rand_src(&self) -> String {
        self.tie_break.clone()
    }

    fn stored_abid(&self) -> &Abid {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abid::verify;

    fn link() -> Link {
        Link::new(
            "https://example.com/",
            "example.com",
            vec!["news".into(), " news ".into(), "".into()],
            ArchiveOptions::default(),
            "salt",
            Utc::now(),
        )
    }

    #[test]
    fn test_new_link_is_due_and_consistent() {
        let link = link();
        assert_eq!(link.status, LinkStatus::Queued);
        assert!(link.is_due(link.created_at));
        assert_eq!(link.tags, vec!["news".to_string()]);
        assert_eq!(link.id.prefix(), "lnk");
        assert!(verify(&link, "salt").is_none());
    }

    #[test]
    fn test_identifier_differs_per_submission() {
        assert_ne!(link().id, link().id);
    }

    #[test]
    fn test_sealed_has_no_retry() {
        let mut link = link();
        let now = Utc::now();
        link.enter_started(now, Duration::from_secs(5));
        assert_eq!(link.retry_at, Some(now + chrono::Duration::seconds(5)));

        link.enter_sealed(now);
        assert_eq!(link.status, LinkStatus::Sealed);
        assert!(link.retry_at.is_none());
        assert_eq!(link.end_ts, Some(now));
        assert!(!link.is_due(now));
    }

    #[test]
    fn test_transitions() {
        use LinkStatus::*;
        assert!(Queued.can_transition_to(Started));
        assert!(Started.can_transition_to(Started));
        assert!(Started.can_transition_to(Sealed));
        assert!(!Sealed.can_transition_to(Queued));
        assert!(!Sealed.can_transition_to(Started));
        assert!(!Queued.can_transition_to(Sealed));
    }

    #[test]
    fn test_url_change_is_detected() {
        let mut link = link();
        link.url = "https://other.example/".into();
        assert!(verify(&link, "salt").is_some());
    }

    #[test]
    fn test_merge_tags() {
        let mut link = link();
        assert!(link.merge_tags(vec!["a".into(), "news".into()]));
        assert_eq!(link.tags, vec!["news".to_string(), "a".to_string()]);
        assert!(!link.merge_tags(vec!["a".into()]));
    }

    #[test]
    fn test_options_filter() {
        let opts = ArchiveOptions {
            overwrite: false,
            only: vec!["pdf".into()],
        };
        assert!(opts.wants("pdf"));
        assert!(!opts.wants("wget"));
        assert!(ArchiveOptions::default().wants("wget"));
    }
}
