use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{expect_artifact, invoke, ExtractResult, Extractor, ExtractorKind, ToolConfig};
use crate::binaries::BinaryResolver;
use crate::models::Link;

const FAVICON_PROVIDER: &str = "https://www.google.com/s2/favicons?domain=";

/// Site icon fetched through a favicon service.
pub struct FaviconExtractor {
    config: ToolConfig,
    resolver: Arc<BinaryResolver>,
}

impl FaviconExtractor {
    pub fn new(config: ToolConfig, resolver: Arc<BinaryResolver>) -> Self {
        Self { config, resolver }
    }

    fn args(&self, link: &Link, timeout: Duration) -> Vec<String> {
        vec![
            "-sS".to_string(),
            "--fail".to_string(),
            "-L".to_string(),
            "--max-time".to_string(),
            timeout.as_secs().max(1).to_string(),
            "--user-agent".to_string(),
            self.config.user_agent.clone(),
            "-o".to_string(),
            ExtractorKind::Favicon.output_name().to_string(),
            format!("{}{}", FAVICON_PROVIDER, link.domain),
        ]
    }
}

#[async_trait]
impl Extractor for FaviconExtractor {
    fn name(&self) -> &str {
        ExtractorKind::Favicon.as_str()
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(ExtractorKind::Favicon.output_name())
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
            Ok(_) => expect_artifact("curl", out_dir, ExtractorKind::Favicon.output_name()),
            Err(e) => Err(e.clone()),
        };
        invocation.finish(out_dir, outcome)
    }
}
