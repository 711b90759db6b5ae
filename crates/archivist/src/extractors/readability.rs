//! Article text extracted from the rendered DOM.
//!
//! Reads the `dom` extractor's `output.html`, so it must run after it. When
//! that file is missing the attempt fails with a transient
//! [`ExtractorError::DependencyNotReady`] and is retried later.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{invoke, is_static_file, ExtractResult, Extractor, ExtractorKind, ToolConfig};
use crate::binaries::BinaryResolver;
use crate::error::ExtractorError;
use crate::models::Link;
use crate::runner::artifact_present;

const ARTICLE_JSON: &str = "article.json";
const CONTENT_HTML: &str = "content.html";
const CONTENT_TXT: &str = "content.txt";

/// The subset of the extractor's JSON we keep.
#[derive(Debug, Deserialize)]
pub(crate) struct Article {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "textContent")]
    pub text_content: Option<String>,
}

pub struct ReadabilityExtractor {
    config: ToolConfig,
    resolver: Arc<BinaryResolver>,
}

impl ReadabilityExtractor {
    pub fn new(config: ToolConfig, resolver: Arc<BinaryResolver>) -> Self {
        Self { config, resolver }
    }
}

/// Split the article JSON into its html and text files.
fn write_article(dir: &Path) -> Result<(), ExtractorError> {
    let raw = std::fs::read_to_string(dir.join(ARTICLE_JSON))
        .map_err(|e| ExtractorError::Io(e.to_string()))?;
    let article: Article = serde_json::from_str(&raw).map_err(|e| ExtractorError::ExtractionFailed {
        tool: "readability-extractor".to_string(),
        status: "exit code 0".to_string(),
        tail: format!("unparseable output: {}", e),
    })?;

    let Some(content) = article.content.filter(|c| !c.trim().is_empty()) else {
        return Err(ExtractorError::UnsupportedContent(
            "no readable article found".to_string(),
        ));
    };
    std::fs::write(dir.join(CONTENT_HTML), content).map_err(|e| ExtractorError::Io(e.to_string()))?;
    std::fs::write(dir.join(CONTENT_TXT), article.text_content.unwrap_or_default())
        .map_err(|e| ExtractorError::Io(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl Extractor for ReadabilityExtractor {
    fn name(&self) -> &str {
        ExtractorKind::Readability.as_str()
    }

    fn output_path(&self) -> PathBuf {
        PathBuf::from(ExtractorKind::Readability.output_name())
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn applies_to(&self, link: &Link) -> bool {
        !is_static_file(&link.url)
    }

    async fn run(&self, link: &Link, out_dir: &Path, timeout: Duration) -> ExtractResult {
        let dom = ExtractorKind::Dom.output_name();
        if !artifact_present(&out_dir.join(dom)) {
            return ExtractResult::failed(
                out_dir,
                ExtractorError::DependencyNotReady(format!("{} has not been produced yet", dom)),
            );
        }

        let dir = out_dir.join(ExtractorKind::Readability.output_name());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            return ExtractResult::failed(out_dir, ExtractorError::Io(e.to_string()));
        }

        let args = vec![dom.to_string(), link.url.clone()];
        let invocation = invoke(
            &self.resolver,
            &self.config,
            out_dir,
            args,
            Some(dir.join(ARTICLE_JSON)),
            timeout,
        )
        .await;

        let outcome = match &invocation.output {
            Ok(_) => write_article(&dir).map(|_| PathBuf::from(ExtractorKind::Readability.output_name())),
            Err(e) => Err(e.clone()),
        };
        if outcome.is_err() {
            // An empty directory must not count as an existing artifact.
            let _ = std::fs::remove_dir_all(&dir);
        }
        invocation.finish(out_dir, outcome)
    }
}

/// Title from a previous readability run, if any.
pub(crate) fn article_title(link_dir: &Path) -> Option<String> {
    let path = link_dir
        .join(ExtractorKind::Readability.output_name())
        .join(ARTICLE_JSON);
    let raw = std::fs::read_to_string(path).ok()?;
    let article: Article = serde_json::from_str(&raw).ok()?;
    article.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArchiveOptions;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_waits_for_dom() {
        let dir = tempdir().unwrap();
        let extractor = ReadabilityExtractor::new(
            ToolConfig {
                binary: "readability-extractor".into(),
                timeout: Duration::from_secs(60),
                extra_args: vec![],
                user_agent: "ua".into(),
            },
            Arc::new(BinaryResolver::default()),
        );
        let link = Link::new(
            "https://example.com/post",
            "example.com",
            vec![],
            ArchiveOptions::default(),
            "s",
            Utc::now(),
        );
        let result = extractor.run(&link, dir.path(), Duration::from_secs(5)).await;
        match result.outcome {
            Err(e @ ExtractorError::DependencyNotReady(_)) => assert!(e.is_transient()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(result.cmd.is_empty());
    }

    #[test]
    fn test_write_article() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(ARTICLE_JSON),
            r#"{"title":" Hello ","content":"<p>Hi</p>","textContent":"Hi"}"#,
        )
        .unwrap();
        write_article(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join(CONTENT_HTML)).unwrap(), "<p>Hi</p>");
        assert_eq!(std::fs::read_to_string(dir.path().join(CONTENT_TXT)).unwrap(), "Hi");
    }

    #[test]
    fn test_empty_article_is_unsupported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(ARTICLE_JSON), r#"{"title":"x","content":""}"#).unwrap();
        assert!(matches!(
            write_article(dir.path()),
            Err(ExtractorError::UnsupportedContent(_))
        ));
    }

    #[test]
    fn test_article_title() {
        let link_dir = tempdir().unwrap();
        let dir = link_dir.path().join("readability");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join(ARTICLE_JSON), r#"{"title":" A Title "}"#).unwrap();
        assert_eq!(article_title(link_dir.path()), Some("A Title".to_string()));
    }
}
