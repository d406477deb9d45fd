//! Mapping of raw transport and HTTP failures onto [`RepositoryError`].
//!
//! # HTTP Status Code Classification
//!
//! | Status | Code |
//! |--------|------|
//! | 401 | Unauthorized |
//! | 403 | Forbidden |
//! | 404, 410 | NotFound |
//! | 408 | Timeout |
//! | 429 | RateLimit (captures `Retry-After`) |
//! | 5xx | ServerError |
//! | other 4xx | InvalidParams |
//!
//! # Transport Failures
//!
//! | Failure | Code |
//! |---------|------|
//! | timeout | Timeout |
//! | refused, reset, DNS | NetworkError |
//! | anything else | NetworkError |

use std::error::Error as _;
use std::io::ErrorKind;

use tracing::{debug, instrument};

use super::retry::parse_retry_after;
use crate::error::{ErrorCode, ErrorDetails, RepositoryError};

/// Coarse category of a failure below the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    Dns,
    Other,
}

/// A failure as observed at the wire, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// The server answered with a non-success status.
    Status {
        url: String,
        status: u16,
        /// Raw `Retry-After` header value, if any.
        retry_after: Option<String>,
    },
    /// The request never produced a usable response.
    Transport {
        url: String,
        kind: TransportKind,
        message: String,
    },
}

impl RawFailure {
    /// Builds a status failure from a response.
    #[must_use]
    pub fn from_response(url: &str, response: &reqwest::Response) -> Self {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        Self::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
            retry_after,
        }
    }

    /// Inspects a reqwest error and its source chain.
    #[must_use]
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportKind::Timeout
        } else {
            io_kind_in_chain(error)
                .or_else(|| looks_like_dns(error).then_some(TransportKind::Dns))
                .unwrap_or(TransportKind::Other)
        };
        Self::Transport {
            url: url.to_string(),
            kind,
            message: error.to_string(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Status { url, .. } | Self::Transport { url, .. } => url,
        }
    }
}

fn io_kind_in_chain(error: &reqwest::Error) -> Option<TransportKind> {
    let mut source = error.source();
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                ErrorKind::TimedOut => Some(TransportKind::Timeout),
                ErrorKind::ConnectionRefused => Some(TransportKind::ConnectionRefused),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                    Some(TransportKind::ConnectionReset)
                }
                _ => None,
            };
        }
        source = current.source();
    }
    None
}

fn looks_like_dns(error: &reqwest::Error) -> bool {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(current) = source {
        text.push(' ');
        text.push_str(&current.to_string());
        source = current.source();
    }
    let text = text.to_lowercase();
    text.contains("dns") || text.contains("failed to lookup") || text.contains("name or service")
}

/// Classifies a raw failure into the error taxonomy.
#[instrument(level = "debug", skip(raw), fields(url = %raw.url()))]
pub fn classify(raw: &RawFailure) -> RepositoryError {
    let error = match raw {
        RawFailure::Status {
            url,
            status,
            retry_after,
        } => classify_status(url, *status, retry_after.as_deref()),
        RawFailure::Transport { url, kind, message } => classify_transport(url, *kind, message),
    };
    debug!(code = %error.code(), "classified failure");
    error
}

#[allow(clippy::match_same_arms)]
fn classify_status(url: &str, status: u16, retry_after: Option<&str>) -> RepositoryError {
    let details = ErrorDetails {
        status: Some(status),
        url: Some(url.to_string()),
        ..ErrorDetails::default()
    };
    match status {
        401 => RepositoryError::new(
            ErrorCode::Unauthorized,
            format!("authentication required for {url}"),
        )
        .with_details(details),
        403 => RepositoryError::new(ErrorCode::Forbidden, format!("access denied for {url}"))
            .with_details(details),
        404 | 410 => RepositoryError::new(ErrorCode::NotFound, format!("not found: {url}"))
            .with_details(details),
        408 => RepositoryError::new(ErrorCode::Timeout, format!("request timed out: {url}"))
            .with_details(details),
        429 => {
            let retry_after_secs = retry_after
                .and_then(parse_retry_after)
                .map(|delay| delay.as_secs().max(1));
            let error = RepositoryError::new(
                ErrorCode::RateLimit,
                format!("rate limited by server for {url}"),
            )
            .with_details(ErrorDetails {
                retry_after_secs,
                ..details
            });
            match retry_after_secs {
                Some(secs) => error.with_suggestion(format!("Wait {secs} seconds before retrying")),
                None => error,
            }
        }
        500..=599 => RepositoryError::new(
            ErrorCode::ServerError,
            format!("server error HTTP {status} for {url}"),
        )
        .with_details(details),
        400..=499 => RepositoryError::new(
            ErrorCode::InvalidParams,
            format!("request rejected with HTTP {status} for {url}"),
        )
        .with_details(details),
        _ => RepositoryError::new(
            ErrorCode::NetworkError,
            format!("unexpected HTTP {status} for {url}"),
        )
        .with_details(details),
    }
}

fn classify_transport(url: &str, kind: TransportKind, message: &str) -> RepositoryError {
    let details = ErrorDetails {
        url: Some(url.to_string()),
        ..ErrorDetails::default()
    };
    match kind {
        TransportKind::Timeout => {
            RepositoryError::new(ErrorCode::Timeout, format!("timeout requesting {url}"))
                .with_details(details)
        }
        TransportKind::Dns => RepositoryError::new(
            ErrorCode::NetworkError,
            format!("could not resolve host for {url}: {message}"),
        )
        .with_details(details)
        .with_suggestion("Check DNS settings and the endpoint host name"),
        TransportKind::ConnectionRefused => RepositoryError::new(
            ErrorCode::NetworkError,
            format!("connection refused for {url}"),
        )
        .with_details(details)
        .with_suggestion("Check that the endpoint is reachable"),
        TransportKind::ConnectionReset => RepositoryError::new(
            ErrorCode::NetworkError,
            format!("connection reset for {url}"),
        )
        .with_details(details),
        TransportKind::Other => RepositoryError::new(
            ErrorCode::NetworkError,
            format!("network error requesting {url}: {message}"),
        )
        .with_details(details),
    }
}

/// True exactly for failures worth retrying after a delay.
#[must_use]
pub fn is_retryable(error: &RepositoryError) -> bool {
    matches!(
        error.code(),
        ErrorCode::RateLimit | ErrorCode::ServerError | ErrorCode::NetworkError | ErrorCode::Timeout
    )
}
