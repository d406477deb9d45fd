//! Repofetch Core Library
//!
//! This library lists, explores and downloads files from hosted model
//! repositories exposed through a tree API and a file-resolve endpoint.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`error`] - The closed error taxonomy and its JSON shape
//! - [`repo_id`] - Repository id validation and path-safety checks
//! - [`endpoints`] - Listing and download URL construction
//! - [`http`] - Retrying HTTP client and failure classification
//! - [`cache`] - Bounded, TTL-expiring result cache with ETag tracking
//! - [`walk`] - Budget-bounded directory traversal and file filtering
//! - [`download`] - Concurrent, resumable download scheduler
//! - [`engine`] - The `list` / `explore` / `download` façade

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod download;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod http;
pub mod repo_id;
pub mod walk;
mod user_agent;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, EvictionPolicy, ResultCache};
pub use download::{
    BatchControl, BatchReport, BatchStats, DownloadScheduler, DownloadTask, ProgressEvent,
    SchedulerConfig, TimeoutPolicy,
};
pub use endpoints::Endpoints;
pub use engine::{
    DownloadOptions, DownloadResult, EngineConfig, ExploreOptions, FetchEngine, ListMode,
    ListOptions, ListResult, SortBy, TreeStructure, parse_size,
};
pub use error::{ErrorCode, ErrorDetails, FileFailure, RepositoryError};
pub use http::{HttpClient, HttpClientConfig, RetryPolicy, classify, is_retryable};
pub use repo_id::RepositoryId;
pub use walk::{DirectoryWalker, FileEntry, FileFilter, WalkBudget, WalkReport};
