//! Failure classification and per-service hooks.
//!
//! The retry loop in [`super::Transport`] is shared by every remote
//! service. What differs per service (credentials, rate-limit headers,
//! error payload shape) is supplied through [`ServiceHooks`].

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;

/// 4xx codes some services return for infrastructure hiccups.
///
/// These are only retried when the body also carries a retry marker.
const INFRA_CLIENT_CODES: [u16; 3] = [408, 409, 422];

const RETRY_MARKERS: [&str; 3] = ["try again", "too quickly", "temporarily unavailable"];

const NETWORK_MARKERS: [&str; 7] = [
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "unexpected eof",
    "end of file",
    "stream error",
];

/// Service-specific behavior plugged into the shared retry loop.
pub trait ServiceHooks: Send + Sync {
    /// Apply credentials and service headers. Called before every attempt.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder;

    /// Whether a non-success response is a rate-limit signal.
    fn is_rate_limited(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        default_rate_limited(status, headers)
    }

    /// Service-provided wait hint for a rate-limit response.
    fn retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
        parse_retry_after(headers)
    }

    /// Render a terminal error body. `None` falls back to the raw body.
    fn format_error(&self, _status: StatusCode, _body: &str) -> Option<String> {
        None
    }
}

/// What the retry loop should do with a non-success response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    RateLimited { retry_after: Option<Duration> },
    Transient,
    Terminal,
}

/// Classify a non-success HTTP response.
pub fn classify_response(
    hooks: &dyn ServiceHooks,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> Disposition {
    if hooks.is_rate_limited(status, headers) {
        return Disposition::RateLimited {
            retry_after: hooks.retry_after(headers),
        };
    }
    if is_transient_status(status, body) {
        return Disposition::Transient;
    }
    Disposition::Terminal
}

/// HTTP 429, or 403 with an exhausted quota header.
#[must_use]
pub fn default_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0")
}

/// `Retry-After` in whole seconds.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// 5xx, or an infrastructure 4xx whose body asks the caller to retry.
#[must_use]
pub fn is_transient_status(status: StatusCode, body: &str) -> bool {
    if status.is_server_error() {
        return true;
    }
    if !INFRA_CLIENT_CODES.contains(&status.as_u16()) {
        return false;
    }
    let lower = body.to_lowercase();
    RETRY_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Whether a transport-level failure is safe to retry.
#[must_use]
pub fn is_transient_network(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = source {
        if is_transient_message(&cause.to_string()) {
            return true;
        }
        source = cause.source();
    }
    false
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Shorten a response body for inclusion in an error message.
#[must_use]
pub fn truncate_for_error(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    struct Plain;

    impl ServiceHooks for Plain {
        fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
            request
        }
    }

    #[test]
    fn test_429_is_rate_limited() {
        let headers = HeaderMap::new();
        assert!(default_rate_limited(StatusCode::TOO_MANY_REQUESTS, &headers));
        assert!(!default_rate_limited(StatusCode::FORBIDDEN, &headers));
    }

    #[test]
    fn test_403_with_zero_quota_is_rate_limited() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert!(default_rate_limited(StatusCode::FORBIDDEN, &headers));

        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        assert!(!default_rate_limited(StatusCode::FORBIDDEN, &headers));
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("17"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(17)));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::BAD_GATEWAY, ""));
        assert!(is_transient_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Something went wrong, please Try Again"
        ));
        assert!(!is_transient_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Validation Failed"
        ));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST, "try again"));
    }

    #[test]
    fn test_classify_prefers_rate_limit() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(
            classify_response(&Plain, StatusCode::TOO_MANY_REQUESTS, &headers, ""),
            Disposition::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert_eq!(
            classify_response(&Plain, StatusCode::NOT_FOUND, &HeaderMap::new(), ""),
            Disposition::Terminal
        );
    }

    #[test]
    fn test_network_markers() {
        assert!(is_transient_message("Connection reset by peer (os error 104)"));
        assert!(is_transient_message("unexpected EOF during handshake"));
        assert!(!is_transient_message("invalid certificate"));
    }

    #[test]
    fn test_truncate_for_error() {
        assert_eq!(truncate_for_error("  short ", 10), "short");
        assert_eq!(truncate_for_error("abcdefghij", 4), "abcd...");
    }
}
