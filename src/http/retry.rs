//! Retry policy with exponential backoff and full jitter.
//!
//! Both the HTTP layer and the download scheduler consult [`RetryPolicy`];
//! retryability itself comes only from [`super::is_retryable`].
//!
//! # Delay Calculation
//!
//! ```text
//! delay = min(base_delay * 2^(attempt - 1), max_delay) * U[0.5, 1.0]
//! ```
//!
//! A rate-limit error carrying `Retry-After` replaces the computed delay
//! with the server's value.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::classify::is_retryable;
use super::constants::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, MAX_RETRY_AFTER};
use crate::error::{ErrorCode, RepositoryError};

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Give up and surface the error.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Configuration for retry behavior.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `base_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `jitter`: enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Same policy with a different attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    /// Disables jitter, making delays deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Decides whether `attempt` (1-indexed, just failed) should be retried.
    #[instrument(level = "debug", skip(self, error), fields(code = %error.code(), max_attempts = self.max_attempts))]
    pub fn should_retry(&self, error: &RepositoryError, attempt: u32) -> RetryDecision {
        if !is_retryable(error) {
            return RetryDecision::DoNotRetry {
                reason: format!("{} is not retryable", error.code()),
            };
        }
        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }
        let delay = self.delay_for(error, attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay before retrying after `error` on `attempt`.
    ///
    /// `Retry-After` on a rate-limit error wins over the backoff schedule.
    #[must_use]
    pub fn delay_for(&self, error: &RepositoryError, attempt: u32) -> Duration {
        if error.code() == ErrorCode::RateLimit {
            if let Some(secs) = error.retry_after_secs() {
                return Duration::from_secs(secs).min(MAX_RETRY_AFTER);
            }
        }
        self.backoff_delay(attempt)
    }

    /// Exponential backoff for `attempt` (1-indexed), jittered into `[0.5, 1.0]`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        if !self.jitter {
            return capped;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        capped.mul_f64(factor)
    }

    fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Parses a `Retry-After` header value (integer seconds or HTTP-date).
///
/// Negative values and past dates yield `None`; values above one hour are capped.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    let duration = datetime.duration_since(std::time::SystemTime::now()).ok()?;
    Some(duration.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorDetails;

    fn server_error() -> RepositoryError {
        RepositoryError::new(ErrorCode::ServerError, "503")
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::default().with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(matches!(
            policy.should_retry(&server_error(), 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let policy =
            RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30)).without_jitter();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(200), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_within_half_to_full() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..50 {
            let delay = policy.backoff_delay(3);
            assert!(delay >= Duration::from_secs(2), "{delay:?}");
            assert!(delay <= Duration::from_secs(4), "{delay:?}");
        }
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::default();
        let error = RepositoryError::new(ErrorCode::RateLimit, "429").with_details(ErrorDetails {
            status: Some(429),
            retry_after_secs: Some(5),
            ..ErrorDetails::default()
        });
        match policy.should_retry(&error, 1) {
            RetryDecision::Retry { delay, attempt } => {
                assert_eq!(delay, Duration::from_millis(5000));
                assert_eq!(attempt, 2);
            }
            RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
        }
    }

    #[test]
    fn test_rate_limit_without_retry_after_uses_backoff() {
        let policy =
            RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1)).without_jitter();
        let error = RepositoryError::new(ErrorCode::RateLimit, "429");
        assert_eq!(policy.delay_for(&error, 2), Duration::from_millis(200));
    }

    // ==================== Decision Tests ====================

    #[test]
    fn test_should_retry_permanent_error() {
        let policy = RetryPolicy::default();
        let error = RepositoryError::new(ErrorCode::NotFound, "404");
        assert!(matches!(
            policy.should_retry(&error, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_should_retry_exhausted() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(matches!(
            policy.should_retry(&server_error(), 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        assert!(matches!(
            policy.should_retry(&server_error(), 3),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    // ==================== Retry-After Parsing Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 120 "), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("99999"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = std::time::SystemTime::now() + Duration::from_secs(90);
        let header = httpdate::fmt_http_date(future);
        let delay = parse_retry_after(&header).unwrap();
        assert!(delay <= Duration::from_secs(90));
        assert!(delay >= Duration::from_secs(85));

        let past = httpdate::fmt_http_date(std::time::SystemTime::UNIX_EPOCH);
        assert_eq!(parse_retry_after(&past), None);
    }
}
