//! Audio/video download with yt-dlp.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{expect_artifact, invoke, ExtractResult, Extractor, ExtractorKind, ToolConfig};
use crate::binaries::BinaryResolver;
use crate::models::Link;

/// Best video up to 1080p plus best audio, falling back to a single stream.
const FORMAT: &str = "bestvideo[height<=1080]+bestaudio/best[height<=1080]/best";

pub struct MediaExtractor {
    config: ToolConfig,
    resolver: Arc<BinaryResolver>,
}

impl MediaExtractor {
    pub fn new(config: ToolConfig, resolver: Arc<BinaryResolver>) -> Self {
        Self { config, resolver }
    }

    fn args(&self, link: &Link, timeout: Duration) -> Vec<String> {
        let dir = ExtractorKind::Media.output_name();
        vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--restrict-filenames".to_string(),
            "--write-info-json".to_string(),
            "--format".to_string(),
            FORMAT.to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--socket-timeout".to_string(),
            timeout.as_secs().max(1).to_string(),
            "--user-agent".to_string(),
            self.config.user_agent.clone(),
            "--output".to_string(),
            format!("{}/%(title).100B.%(ext)s", dir),
            link.url.clone(),
        ]
    }
}

#[async_trait]
impl Extractor for MediaExtractor {
    fn name(&self) -> &str {
        ExtractorKind::Media.as_str()
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(ExtractorKind::Media.output_name())
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
        let outcome = match &invocation.output {
            Ok(_) => expect_artifact("yt-dlp", out_dir, ExtractorKind::Media.output_name()),
            Err(e) => Err(e.clone()),
        };
        invocation.finish(out_dir, outcome)
    }
}
