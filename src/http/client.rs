//! Retrying HTTP client shared by the walker and the download scheduler.
//!
//! The client is created once and cloned freely: clones share the
//! connection pool and the installed bearer token.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_LENGTH, HeaderMap, HeaderName};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, info, instrument, warn};

use super::classify::{RawFailure, classify};
use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_MAX_IDLE_PER_HOST, REQUEST_TIMEOUT_SECS};
use super::retry::{RetryDecision, RetryPolicy};
use crate::error::{ErrorCode, RepositoryError};
use crate::user_agent;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Construction-time settings for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    /// Default whole-request timeout; [`RequestOptions::timeout`] overrides it.
    pub request_timeout: Duration,
    /// Idle keep-alive connections kept per host.
    ///
    /// reqwest has no cap on open sockets; this bounds the reused pool only.
    /// Concurrent transfers are capped by the download scheduler's semaphore.
    pub max_idle_per_host: usize,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            user_agent: user_agent::default_user_agent(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Attempt ceiling for this request; `None` uses the client policy.
    pub max_attempts: Option<u32>,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// A single attempt, leaving retry to the caller.
    #[must_use]
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }
}

/// HTTP client with retry, backoff and bearer-token support.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
    token: Arc<RwLock<Option<String>>>,
}

impl HttpClient {
    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::NetworkError`] if the TLS backend or resolver cannot be initialized.
    pub fn new(config: HttpClientConfig) -> Result<Self, RepositoryError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(60))
            .gzip(true)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| {
                RepositoryError::new(
                    ErrorCode::NetworkError,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;
        debug!(
            max_idle_per_host = config.max_idle_per_host,
            max_attempts = config.retry.max_attempts(),
            "created HTTP client"
        );
        Ok(Self {
            client,
            retry: config.retry,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Installs or clears the bearer token applied to subsequent requests.
    pub fn set_token(&self, token: Option<String>) {
        let token = token.filter(|t| !t.trim().is_empty());
        info!(installed = token.is_some(), "bearer token updated");
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// `GET` with retry. A `304 Not Modified` is returned as a response.
    ///
    /// # Errors
    ///
    /// The classified failure of the last attempt.
    pub async fn get(&self, url: &str, options: &RequestOptions) -> Result<Response, RepositoryError> {
        self.execute_with_retry(Method::GET, url, options).await
    }

    /// `HEAD` with retry.
    ///
    /// # Errors
    ///
    /// The classified failure of the last attempt.
    pub async fn head(&self, url: &str, options: &RequestOptions) -> Result<Response, RepositoryError> {
        self.execute_with_retry(Method::HEAD, url, options).await
    }

    /// `GET` for streaming a file body; asks for an unencoded body so that
    /// `Content-Length` describes the bytes written to disk.
    ///
    /// # Errors
    ///
    /// The classified failure of the last attempt.
    pub async fn download(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, RepositoryError> {
        let mut options = options.clone();
        if !options.headers.contains_key(ACCEPT_ENCODING) {
            options
                .headers
                .insert(ACCEPT_ENCODING, reqwest::header::HeaderValue::from_static("identity"));
        }
        self.execute_with_retry(Method::GET, url, &options).await
    }

    /// Remote size from a `HEAD` request's `Content-Length`.
    ///
    /// # Errors
    ///
    /// The classified failure of the last attempt.
    pub async fn file_size(&self, url: &str) -> Result<Option<u64>, RepositoryError> {
        let response = self.head(url, &RequestOptions::default()).await?;
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok()))
    }

    /// Sends `method url` until it succeeds, fails permanently, or the
    /// attempt ceiling is reached.
    ///
    /// # Errors
    ///
    /// The classified failure of the last attempt.
    #[instrument(skip(self, options), fields(method = %method, url = %url))]
    pub async fn execute_with_retry(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, RepositoryError> {
        let policy = match options.max_attempts {
            Some(max_attempts) => self.retry.with_max_attempts(max_attempts),
            None => self.retry.clone(),
        };
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "sending request");

            let error = match self.send_once(method.clone(), url, options).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            match policy.should_retry(&error, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    warn!(
                        url = %url,
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        code = %error.code(),
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %url, %reason, "not retrying request");
                    return Err(error);
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, RepositoryError> {
        let mut request = self
            .client
            .request(method, url)
            .headers(options.headers.clone())
            .header(REQUEST_ID_HEADER, request_id());
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        let token = self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(&RawFailure::from_reqwest(url, &e)))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            Ok(response)
        } else {
            Err(classify(&RawFailure::from_response(url, &response)))
        }
    }
}

fn request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}
