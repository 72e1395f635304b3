//! Transport error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`super::Transport`].
///
/// `NotFound` is kept distinct from other terminal failures because the
/// sync engine treats it as a recoverable signal (stale sync record).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rate limited (HTTP {status})")]
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("transient server error (HTTP {status}): {message}")]
    Transient { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ApiError>,
    },

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    /// True when the remote reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status behind this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Api { status, .. }
            | Self::RateLimited { status, .. }
            | Self::Transient { status, .. } => Some(*status),
            Self::Network(err) => err.status().map(|s| s.as_u16()),
            Self::RetriesExhausted { last, .. } => last.status(),
            Self::Decode(_) | Self::Encode(_) | Self::Cancelled => None,
        }
    }

    /// Whether the failure came from retry exhaustion or a transient cause.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Transient { .. }
                | Self::Network(_)
                | Self::RetriesExhausted { .. }
        )
    }
}
