//! Submit the URL to the Wayback Machine and record the snapshot location.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{invoke, ExtractResult, Extractor, ExtractorKind, ToolConfig};
use crate::binaries::BinaryResolver;
use crate::error::ExtractorError;
use crate::models::Link;

const SAVE_ENDPOINT: &str = "https://web.archive.org/save/";
const ARCHIVE_BASE: &str = "https://web.archive.org";

pub struct ArchiveOrgExtractor {
    config: ToolConfig,
    resolver: Arc<BinaryResolver>,
}

impl ArchiveOrgExtractor {
    pub fn new(config: ToolConfig, resolver: Arc<BinaryResolver>) -> Self {
        Self { config, resolver }
    }

    fn args(&self, link: &Link, timeout: Duration) -> Vec<String> {
        vec![
            "-sS".to_string(),
            "-L".to_string(),
            "--head".to_string(),
            "--max-time".to_string(),
            timeout.as_secs().max(1).to_string(),
            "--user-agent".to_string(),
            self.config.user_agent.clone(),
            format!("{}{}", SAVE_ENDPOINT, link.url),
        ]
    }
}

/// What the save endpoint's response headers say.
#[derive(Debug, PartialEq, Eq)]
enum SaveResponse {
    Saved(String),
    Refused(String),
    Unknown,
}

fn parse_save_response(headers: &str) -> SaveResponse {
    let mut location = None;
    for line in headers.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match name.as_str() {
            "x-archive-wayback-runtime-error" => return SaveResponse::Refused(value.to_string()),
            "content-location" | "location" if value.starts_with("/web/") => {
                location = Some(format!("{}{}", ARCHIVE_BASE, value));
            }
            "content-location" | "location" if value.starts_with(ARCHIVE_BASE) => {
                location = Some(value.to_string());
            }
            _ => {}
        }
    }
    location.map_or(SaveResponse::Unknown, SaveResponse::Saved)
}

#[async_trait]
impl Extractor for ArchiveOrgExtractor {
    fn name(&self) -> &str {
        ExtractorKind::ArchiveOrg.as_str()
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(ExtractorKind::ArchiveOrg.output_name())
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn run(&self, link: &Link, out_dir: &Path, timeout: Duration) -> ExtractResult {
        let invocation = invoke(
            &self.resolver,
            &self.config,
            out_dir,
            self.args(link, timeout),
            None,
            timeout,
        )
        .await;

        let output = ExtractorKind::ArchiveOrg.output_name();
        let outcome = match &invocation.output {
            Ok(run) => match parse_save_response(&run.stdout) {
                SaveResponse::Saved(location) => {
                    std::fs::write(out_dir.join(output), format!("{}\n", location))
                        .map(|_| PathBuf::from(output))
                        .map_err(|e| ExtractorError::Io(e.to_string()))
                }
                SaveResponse::Refused(reason) if reason.contains("RobotAccessControlException") => {
                    Err(ExtractorError::RobotsDenied)
                }
                SaveResponse::Refused(reason) => Err(ExtractorError::ServerError(reason)),
                SaveResponse::Unknown => Err(ExtractorError::ExtractionFailed {
                    tool: "curl".to_string(),
                    status: run.status_text(),
                    tail: "no snapshot location in response headers".to_string(),
                }),
            },
            Err(e) => Err(e.clone()),
        };
        invocation.finish(out_dir, outcome)
    }
}
