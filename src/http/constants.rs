//! Constants for the HTTP layer (timeouts, pool size, retry bounds).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout for API calls (30 seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Idle keep-alive connections kept per host.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 10;

/// Default attempts per request, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
