use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{expect_artifact, invoke, is_static_file, ExtractResult, Extractor, ExtractorKind, ToolConfig};
use crate::binaries::BinaryResolver;
use crate::models::Link;

/// Self-contained HTML snapshot via SingleFile.
pub struct SingleFileExtractor {
    config: ToolConfig,
    resolver: Arc<BinaryResolver>,
}

impl SingleFileExtractor {
    pub fn new(config: ToolConfig, resolver: Arc<BinaryResolver>) -> Self {
        Self { config, resolver }
    }
}

#[async_trait]
impl Extractor for SingleFileExtractor {
    fn name(&self) -> &str {
        ExtractorKind::SingleFile.as_str()
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(ExtractorKind::SingleFile.output_name())
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn applies_to(&self, link: &Link) -> bool {
        !is_static_file(&link.url)
    }

    async fn run(&self, link: &Link, out_dir: &Path, timeout: Duration) -> ExtractResult {
        let output = ExtractorKind::SingleFile.output_name();
        let args = vec![
            format!("--user-agent={}", self.config.user_agent),
            link.url.clone(),
            output.to_string(),
        ];
        let invocation = invoke(&self.resolver, &self.config, out_dir, args, None, timeout).await;
        let outcome = match &invocation.output {
            Ok(_) => expect_artifact("single-file", out_dir, output),
            Err(e) => Err(e.clone()),
        };
        invocation.finish(out_dir, outcome)
    }
}
