//! Mapping tool output to [`ExtractorError`] kinds.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::{RunOutput, ERROR_TAIL_LINES};
use crate::error::ExtractorError;

#[derive(Debug, Clone, Copy)]
enum Signal {
    Robots,
    NotFound,
    Forbidden,
    RateLimited,
    ServerError,
    Connection,
    Unsupported,
}

/// Checked in order; the first match wins.
fn patterns() -> &'static [(Signal, Regex)] {
    static PATTERNS: OnceLock<Vec<(Signal, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table = [
            (Signal::Robots, r"(?i)robots\.txt|disallowed by robots|RobotAccessControlException"),
            (Signal::NotFound, r"(?i)(error|status|http)[^\n]{0,12}\b404\b|\b404:? not found"),
            (Signal::Forbidden, r"(?i)(error|status|http)[^\n]{0,12}\b403\b|\b403:? forbidden"),
            (
                Signal::RateLimited,
                r"(?i)(error|status|http)[^\n]{0,12}\b429\b|too many requests|rate.?limit",
            ),
            (
                Signal::ServerError,
                r"(?i)(error|status|http)[^\n]{0,12}\b5\d\d\b|internal server error|bad gateway|service unavailable|gateway time-?out",
            ),
            (
                Signal::Connection,
                r"(?i)connection (reset|refused|timed out)|could not resolve host|unable to resolve host|temporary failure in name resolution|name or service not known|network is unreachable|ssl[_ ]?error|tls handshake|ERR_NAME_NOT_RESOLVED|ERR_CONNECTION",
            ),
            (
                Signal::Unsupported,
                r"(?i)unsupported url|unsupported content|unsupported media type|no video formats found",
            ),
        ];
        table
            .into_iter()
            .filter_map(|(signal, pattern)| Regex::new(pattern).ok().map(|re| (signal, re)))
            .collect()
    })
}

/// Interpret a finished command.
///
/// A clean exit is success. A timeout is [`ExtractorError::Timeout`].
/// Otherwise the output is matched against known failure signatures; an
/// unrecognised failure becomes a transient `ExtractionFailed` carrying the
/// exit status and the last few lines of output.
pub fn classify(output: &RunOutput, timeout: Duration) -> Result<(), ExtractorError> {
    if output.timed_out {
        return Err(ExtractorError::Timeout(timeout));
    }
    if output.success {
        return Ok(());
    }

    let text = format!("{}\n{}", output.stderr, output.stdout);
    for (signal, re) in patterns() {
        if let Some(m) = re.find(&text) {
            let matched = m.as_str().trim().to_string();
            return Err(match signal {
                Signal::Robots => ExtractorError::RobotsDenied,
                Signal::NotFound => ExtractorError::NotFound,
                Signal::Forbidden => ExtractorError::Forbidden,
                Signal::RateLimited => ExtractorError::RateLimited,
                Signal::ServerError => ExtractorError::ServerError(matched),
                Signal::Connection => ExtractorError::ConnectionFailed(matched),
                Signal::Unsupported => ExtractorError::UnsupportedContent(matched),
            });
        }
    }

    Err(ExtractorError::ExtractionFailed {
        tool: output.tool.clone(),
        status: output.status_text(),
        tail: output.tail_lines(ERROR_TAIL_LINES),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> RunOutput {
        RunOutput {
            tool: "wget".into(),
            exit_code: Some(8),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    const T: Duration = Duration::from_secs(60);

    #[test]
    fn test_success_and_timeout() {
        let ok = RunOutput {
            success: true,
            exit_code: Some(0),
            stderr: "ERROR 404: Not Found.".into(),
            ..Default::default()
        };
        assert_eq!(classify(&ok, T), Ok(()));

        let slow = RunOutput {
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(classify(&slow, T), Err(ExtractorError::Timeout(T)));
    }

    #[test]
    fn test_http_statuses() {
        assert_eq!(
            classify(&failed("2024-01-01 ERROR 404: Not Found."), T),
            Err(ExtractorError::NotFound)
        );
        assert_eq!(
            classify(&failed("curl: (22) The requested URL returned error: 403"), T),
            Err(ExtractorError::Forbidden)
        );
        assert_eq!(
            classify(&failed("ERROR: HTTP Error 429: Too Many Requests"), T),
            Err(ExtractorError::RateLimited)
        );
        assert!(matches!(
            classify(&failed("ERROR 503: Service Unavailable."), T),
            Err(ExtractorError::ServerError(_))
        ));
    }

    #[test]
    fn test_network_and_content_failures() {
        assert!(matches!(
            classify(&failed("curl: (6) Could not resolve host: nowhere.invalid"), T),
            Err(ExtractorError::ConnectionFailed(_))
        ));
        assert!(matches!(
            classify(&failed("ERROR: Unsupported URL: https://example.com/"), T),
            Err(ExtractorError::UnsupportedContent(_))
        ));
        assert_eq!(
            classify(&failed("fetch disallowed by robots.txt"), T),
            Err(ExtractorError::RobotsDenied)
        );
    }

    #[test]
    fn test_unknown_failure_keeps_tail() {
        let mut out = failed("");
        out.stderr = (1..=15).map(|i| format!("line {}\n", i)).collect();
        match classify(&out, T) {
            Err(ExtractorError::ExtractionFailed { tool, status, tail }) => {
                assert_eq!(tool, "wget");
                assert_eq!(status, "exit code 8");
                assert!(tail.starts_with("line 6"));
                assert!(tail.ends_with("line 15"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_plain_numbers_are_not_statuses() {
        assert!(matches!(
            classify(&failed("downloaded 404 bytes then crashed"), T),
            Err(ExtractorError::ExtractionFailed { .. })
        ));
    }
}
