//! HTTP plumbing: failure classification, retry policy and the client.
//!
//! # Features
//!
//! - Single classification point for transport and status failures
//! - Exponential backoff with full jitter, honoring `Retry-After`
//! - Shared keep-alive pool and installable bearer token
//!
//! # Example
//!
//! ```no_run
//! use repofetch_core::http::{HttpClient, HttpClientConfig, RequestOptions};
//!
//! # async fn example() -> Result<(), repofetch_core::RepositoryError> {
//! let client = HttpClient::new(HttpClientConfig::default())?;
//! client.set_token(std::env::var("HF_TOKEN").ok());
//! let response = client
//!     .get("https://huggingface.co/api/models/openai/whisper-tiny/tree/main", &RequestOptions::default())
//!     .await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

mod classify;
mod client;
pub mod constants;
mod retry;

pub use classify::{RawFailure, TransportKind, classify, is_retryable};
pub use client::{HttpClient, HttpClientConfig, RequestOptions};
pub use retry::{RetryDecision, RetryPolicy, parse_retry_after};
