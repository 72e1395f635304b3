//! Retry-aware HTTP transport.
//!
//! One generic retry executor shared by every remote integration:
//!
//! - **Body replay**: the JSON body is serialized once into [`ApiRequest`]
//!   and replayed byte-for-byte on every attempt
//! - **Hooks**: credentials, rate-limit detection and error formatting come
//!   from a per-service [`ServiceHooks`] implementation
//! - **Classification**: transient network faults, rate limits and
//!   transient server errors are retried; everything else returns at once
//! - **Cancellation**: in-flight requests and backoff sleeps abort when the
//!   transport's [`CancellationToken`] fires

mod classify;
mod error;
mod retry;

pub use classify::{
    classify_response, default_rate_limited, is_transient_network, is_transient_status,
    parse_retry_after, truncate_for_error, Disposition, ServiceHooks,
};
pub use error::ApiError;
pub use retry::{RetryConfig, RetrySettings, DEFAULT_RATE_LIMIT_DELAY};

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_MAX_CHARS: usize = 800;

/// A prepared request whose body is already encoded.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    query: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    #[must_use]
    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    #[must_use]
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Encode `body` as JSON. This is the only serialization of the body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Encode`] if the value cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_vec(body).map_err(ApiError::Encode)?);
        Ok(self)
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Encoded body bytes, if any.
    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// A successful response with its body fully read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(ApiError::Decode)
    }
}

/// Retry-aware executor bound to one service's hooks.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    retry: RetryConfig,
    hooks: Arc<dyn ServiceHooks>,
    cancel: CancellationToken,
}

impl Transport {
    /// Build a transport with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the HTTP client cannot be built.
    pub fn new(hooks: Arc<dyn ServiceHooks>, retry: RetryConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ApiError::Network)?;
        Ok(Self {
            client,
            retry,
            hooks,
            cancel: CancellationToken::new(),
        })
    }

    /// Tie all waits of this transport to the caller's cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Execute `request` and decode a JSON response.
    ///
    /// # Errors
    ///
    /// See [`Transport::execute`]; additionally [`ApiError::Decode`].
    pub async fn json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        self.execute(request).await?.json()
    }

    /// Execute `request`, discarding the response body.
    ///
    /// # Errors
    ///
    /// See [`Transport::execute`].
    pub async fn send(&self, request: &ApiRequest) -> Result<(), ApiError> {
        self.execute(request).await.map(|_| ())
    }

    /// Execute `request` with retries.
    ///
    /// # Errors
    ///
    /// - [`ApiError::NotFound`] for a 404
    /// - [`ApiError::Api`] for any other terminal status
    /// - [`ApiError::RetriesExhausted`] wrapping the last transient failure
    /// - [`ApiError::Cancelled`] when the cancellation token fires
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            debug!(method = %request.method, url = %request.url, attempt, "sending request");

            let (failure, hinted_wait) = match self.attempt(request).await? {
                Attempt::Done(response) => return Ok(response),
                Attempt::Retry { error, wait } => (error, wait),
            };

            if attempt == max_attempts {
                last_failure = Some(failure);
                break;
            }

            let delay = hinted_wait.unwrap_or_else(|| self.retry.backoff(attempt));
            warn!(
                method = %request.method,
                url = %request.url,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "retrying request"
            );
            last_failure = Some(failure);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ApiError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        Err(ApiError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last_failure.unwrap_or(ApiError::Cancelled)),
        })
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<Attempt, ApiError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        let builder = self.hooks.authorize(builder);

        let sent = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ApiError::Cancelled),
            sent = builder.send() => sent,
        };

        let response = match sent {
            Ok(response) => response,
            Err(err) if is_transient_network(&err) => {
                return Ok(Attempt::Retry {
                    error: ApiError::Network(err),
                    wait: None,
                });
            }
            Err(err) => return Err(ApiError::Network(err)),
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ApiError::Cancelled),
            body = response.bytes() => body,
        };
        let body = match body {
            Ok(bytes) => bytes.to_vec(),
            Err(err) if is_transient_network(&err) => {
                return Ok(Attempt::Retry {
                    error: ApiError::Network(err),
                    wait: None,
                });
            }
            Err(err) => return Err(ApiError::Network(err)),
        };

        if status.is_success() {
            return Ok(Attempt::Done(ApiResponse {
                status,
                headers,
                body,
            }));
        }

        let text = String::from_utf8_lossy(&body);
        match classify_response(self.hooks.as_ref(), status, &headers, &text) {
            Disposition::RateLimited { retry_after } => Ok(Attempt::Retry {
                error: ApiError::RateLimited {
                    status: status.as_u16(),
                    retry_after,
                },
                wait: Some(self.retry.rate_limit_wait(retry_after)),
            }),
            Disposition::Transient => Ok(Attempt::Retry {
                error: ApiError::Transient {
                    status: status.as_u16(),
                    message: truncate_for_error(&text, ERROR_BODY_MAX_CHARS),
                },
                wait: None,
            }),
            Disposition::Terminal if status == StatusCode::NOT_FOUND => Err(ApiError::NotFound {
                url: request.url.clone(),
            }),
            Disposition::Terminal => Err(ApiError::Api {
                status: status.as_u16(),
                message: self
                    .hooks
                    .format_error(status, &text)
                    .unwrap_or_else(|| truncate_for_error(&text, ERROR_BODY_MAX_CHARS)),
            }),
        }
    }
}

enum Attempt {
    Done(ApiResponse),
    Retry {
        error: ApiError,
        wait: Option<Duration>,
    },
}
