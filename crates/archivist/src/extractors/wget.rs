//! Recursive page mirror with wget.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{expect_artifact, invoke, is_static_file, ExtractResult, Extractor, ExtractorKind, ToolConfig};
use crate::binaries::BinaryResolver;
use crate::error::ExtractorError;
use crate::models::Link;

/// wget's "server issued an error response" exit code. Common when one
/// page requisite 404s while the page itself was saved.
const WGET_SERVER_ERROR_EXIT: i32 = 8;

pub struct MirrorExtractor {
    config: ToolConfig,
    resolver: Arc<BinaryResolver>,
}

impl MirrorExtractor {
    pub fn new(config: ToolConfig, resolver: Arc<BinaryResolver>) -> Self {
        Self { config, resolver }
    }

    fn args(&self, link: &Link, timeout: Duration) -> Vec<String> {
        let output = ExtractorKind::Mirror.output_name();
        let mut args = vec![
            "--no-verbose".to_string(),
            "--adjust-extension".to_string(),
            "--convert-links".to_string(),
            "--force-directories".to_string(),
            "--backup-converted".to_string(),
            "--span-hosts".to_string(),
            "--no-parent".to_string(),
            "-e".to_string(),
            "robots=off".to_string(),
            "--restrict-file-names=windows".to_string(),
            format!("--timeout={}", timeout.as_secs().max(1)),
            format!("--directory-prefix={}", output),
            format!("--user-agent={}", self.config.user_agent),
        ];
        if !is_static_file(&link.url) {
            args.push("--page-requisites".to_string());
        }
        args.push(link.url.clone());
        args
    }
}

#[async_trait]
impl Extractor for MirrorExtractor {
    fn name(&self) -> &str {
        ExtractorKind::Mirror.as_str()
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(ExtractorKind::Mirror.output_name())
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

        let output = ExtractorKind::Mirror.output_name();
        let outcome = match &invocation.output {
            Ok(_) => expect_artifact("wget", out_dir, output),
            Err(ExtractorError::ExtractionFailed { status, .. })
                if status == &format!("exit code {}", WGET_SERVER_ERROR_EXIT) =>
            {
                // Partial mirror: keep it if anything landed.
                expect_artifact("wget", out_dir, output)
            }
            Err(e) => Err(e.clone()),
        };
        invocation.finish(out_dir, outcome)
    }
}
