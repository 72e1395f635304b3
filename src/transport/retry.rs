//! Retry configuration and backoff schedule.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wait after a rate-limit response when the service gives no longer hint.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);

/// Retry policy for one [`super::Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Floor for the wait after a rate-limit response.
    pub rate_limit_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
        }
    }
}

/// Retry settings as stored in the config file (milliseconds).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: settings.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            base_delay: settings
                .base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            max_delay: settings
                .max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
            rate_limit_delay: defaults.rate_limit_delay,
        }
    }
}

impl RetryConfig {
    /// Un-jittered wait before retrying after `attempt` (1-indexed) failed:
    /// `min(base * 2^(attempt-1), max)`.
    #[must_use]
    pub fn backoff_base(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Wait before the next attempt: the base schedule plus jitter drawn
    /// uniformly from `[0, delay/4)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff_base(attempt);
        delay + jitter(delay)
    }

    /// Wait after a rate-limit response.
    #[must_use]
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.map_or(self.rate_limit_delay, |hint| hint.max(self.rate_limit_delay))
    }
}

fn jitter(delay: Duration) -> Duration {
    let quarter = u64::try_from((delay / 4).as_nanos()).unwrap_or(u64::MAX);
    if quarter == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..quarter))
}
