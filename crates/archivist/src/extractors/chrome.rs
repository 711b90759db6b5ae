//! Headless Chromium renders: PDF, screenshot and serialized DOM.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{expect_artifact, invoke, is_static_file, ExtractResult, Extractor, ExtractorKind, ToolConfig};
use crate::binaries::BinaryResolver;
use crate::models::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromeMode {
    Pdf,
    Screenshot,
    Dom,
}

impl ChromeMode {
    fn kind(&self) -> ExtractorKind {
        match self {
            Self::Pdf => ExtractorKind::Pdf,
            Self::Screenshot => ExtractorKind::Screenshot,
            Self::Dom => ExtractorKind::Dom,
        }
    }
}

pub struct ChromeExtractor {
    mode: ChromeMode,
    config: ToolConfig,
    resolver: Arc<BinaryResolver>,
}

impl ChromeExtractor {
    pub fn new(mode: ChromeMode, config: ToolConfig, resolver: Arc<BinaryResolver>) -> Self {
        Self {
            mode,
            config,
            resolver,
        }
    }

    fn args(&self, link: &Link, out_dir: &Path, timeout: Duration) -> Vec<String> {
        let mut args = vec![
            "--headless=new".to_string(),
            "--disable-gpu".to_string(),
            "--hide-scrollbars".to_string(),
            "--run-all-compositor-stages-before-draw".to_string(),
            format!("--user-agent={}", self.config.user_agent),
            format!("--timeout={}", timeout.as_millis()),
        ];
        let target = out_dir.join(self.mode.kind().output_name());
        match self.mode {
            ChromeMode::Pdf => args.push(format!("--print-to-pdf={}", target.display())),
            ChromeMode::Screenshot => {
                args.push(format!("--screenshot={}", target.display()));
                args.push("--window-size=1440,2000".to_string());
            }
            ChromeMode::Dom => args.push("--dump-dom".to_string()),
        }
        args.push(link.url.clone());
        args
    }
}

#[async_trait]
impl Extractor for ChromeExtractor {
    fn name(&self) -> &str {
        self.mode.kind().as_str()
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(self.mode.kind().output_name())
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn applies_to(&self, link: &Link) -> bool {
        !is_static_file(&link.url)
    }

    async fn run(&self, link: &Link, out_dir: &Path, timeout: Duration) -> ExtractResult {
        let output = self.mode.kind().output_name();
        // The DOM arrives on stdout; stage it so a failed run leaves no
        // partial file that would later count as an existing artifact.
        let staging = (self.mode == ChromeMode::Dom).then(|| out_dir.join(format!("{}.part", output)));

        let invocation = invoke(
            &self.resolver,
            &self.config,
            out_dir,
            self.args(link, out_dir, timeout),
            staging.clone(),
            timeout,
        )
        .await;

        let outcome = match (&invocation.output, staging) {
            (Ok(_), Some(staging)) => std::fs::rename(&staging, out_dir.join(output))
                .map_err(|e| crate::error::ExtractorError::Io(e.to_string()))
                .and_then(|_| expect_artifact(self.name(), out_dir, output)),
            (Ok(_), None) => expect_artifact(self.name(), out_dir, output),
            (Err(e), staging) => {
                if let Some(staging) = staging {
                    let _ = std::fs::remove_file(staging);
                }
                Err(e.clone())
            }
        };
        invocation.finish(out_dir, outcome)
    }
}
