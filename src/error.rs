//! Error taxonomy surfaced across the fetch engine boundary.
//!
//! Every fallible operation in this crate returns [`RepositoryError`]. The
//! [`ErrorCode`] set is closed: transport and HTTP failures are classified
//! once (see [`crate::http::classify`]) and everything above the HTTP layer
//! only sees typed errors.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Repository, revision or file does not exist.
    NotFound,
    /// Missing or invalid credentials (HTTP 401).
    Unauthorized,
    /// Credentials lack access (HTTP 403).
    Forbidden,
    /// Server rate limiting (HTTP 429).
    RateLimit,
    /// HTTP 5xx.
    ServerError,
    /// Connection, DNS, local I/O and unrecognized failures.
    NetworkError,
    /// Request or transfer timed out.
    Timeout,
    /// Caller input failed validation.
    InvalidParams,
    /// Input attempted to escape the repository or target directory.
    PathTraversal,
    /// A configured limit was exceeded.
    LimitExceeded,
}

impl ErrorCode {
    /// Wire name of the code, e.g. `RATE_LIMIT`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::RateLimit => "RATE_LIMIT",
            Self::ServerError => "SERVER_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::LimitExceeded => "LIMIT_EXCEEDED",
        }
    }

    /// Remediation hints used when a constructor does not supply its own.
    #[must_use]
    pub fn default_suggestions(self) -> Vec<String> {
        let hints: &[&str] = match self {
            Self::NotFound => &[
                "Check the repository id spelling (format: owner/repo)",
                "Confirm the repository exists and is public, or provide an access token",
            ],
            Self::Unauthorized => &[
                "Check that your access token is valid",
                "Set HF_TOKEN for private repositories",
            ],
            Self::Forbidden => &[
                "Confirm you have been granted access to this repository",
                "Provide a token with the required permissions",
            ],
            Self::RateLimit => &[
                "Wait before retrying",
                "Use an access token for higher rate limits",
            ],
            Self::ServerError => &["The server is having trouble, retry later"],
            Self::NetworkError => &[
                "Check your network connection and firewall settings",
                "Configure HTTPS_PROXY if you are behind a proxy",
            ],
            Self::Timeout => &[
                "Retry later or on a faster connection",
                "Narrow the request with a path or include pattern",
            ],
            Self::InvalidParams => &["Check the request parameters"],
            Self::PathTraversal => &["Use plain relative paths without '..' or leading '/'"],
            Self::LimitExceeded => &["Raise the limit or narrow the request"],
        };
        hints.iter().map(|hint| (*hint).to_string()).collect()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed file inside an aggregated batch error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    /// Repository-relative path.
    pub path: String,
    /// Classification of the final failure.
    pub code: ErrorCode,
    /// Final failure message.
    pub message: String,
    /// Retries consumed before giving up.
    pub retry_count: u32,
}

/// Structured context attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FileFailure>,
}

/// The single error type of the fetch engine.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("[{code}] {message}")]
pub struct RepositoryError {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ErrorDetails>,
    suggestions: Vec<String>,
}

impl RepositoryError {
    /// Creates an error carrying the default suggestions for `code`.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            suggestions: code.default_suggestions(),
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Places `suggestion` first, ahead of the defaults.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.insert(0, suggestion.into());
        self
    }

    /// Input validation failure for `field`.
    pub fn invalid_params(field: &str, value: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message).with_details(ErrorDetails {
            field: Some(field.to_string()),
            value: Some(value.to_string()),
            ..ErrorDetails::default()
        })
    }

    /// Path traversal attempt in `field`.
    pub fn path_traversal(field: &str, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        Self::new(
            ErrorCode::PathTraversal,
            format!("{field} contains an unsafe path: {value}"),
        )
        .with_details(ErrorDetails {
            field: Some(field.to_string()),
            value: Some(value),
            ..ErrorDetails::default()
        })
    }

    /// Local filesystem failure, classified as a network-side failure of the transfer.
    pub fn local_io(path: &Path, source: &std::io::Error) -> Self {
        Self::new(
            ErrorCode::NetworkError,
            format!("I/O error at {}: {source}", path.display()),
        )
        .with_details(ErrorDetails {
            path: Some(path.display().to_string()),
            ..ErrorDetails::default()
        })
        .with_suggestion("Check free disk space and write permissions for the target directory")
    }

    /// Byte count after transfer does not match the expected size.
    pub fn size_mismatch(path: &str, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::new(
            ErrorCode::NetworkError,
            format!("size mismatch for {path}: expected {expected_bytes} bytes, got {actual_bytes}"),
        )
        .with_details(ErrorDetails {
            path: Some(path.to_string()),
            expected_bytes: Some(expected_bytes),
            actual_bytes: Some(actual_bytes),
            ..ErrorDetails::default()
        })
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn details(&self) -> Option<&ErrorDetails> {
        self.details.as_ref()
    }

    #[must_use]
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// `Retry-After` in seconds, if the server sent one.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.details.as_ref().and_then(|d| d.retry_after_secs)
    }

    /// The `{code, message, details?, suggestions[]}` wire shape.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "code": self.code.as_str(),
                "message": self.message,
                "suggestions": self.suggestions,
            })
        })
    }
}
