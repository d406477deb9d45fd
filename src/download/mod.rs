//! Concurrent, resumable file downloads.
//!
//! A [`DownloadTask`] moves one remote file into place through a `.part`
//! temp file; the [`DownloadScheduler`] runs many of them under a
//! concurrency bound with per-file retry.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use repofetch_core::download::{BatchControl, DownloadScheduler, DownloadTask, SchedulerConfig};
//! use repofetch_core::http::{HttpClient, HttpClientConfig};
//! use repofetch_core::walk::FileEntry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let http = Arc::new(HttpClient::new(HttpClientConfig::default())?);
//! let scheduler = DownloadScheduler::new(http, SchedulerConfig::default())?;
//! let file = FileEntry { path: "config.json".into(), size: Some(665), oid: None, lfs: false };
//! let task = DownloadTask::new(
//!     file,
//!     "https://huggingface.co/gpt2/resolve/main/config.json",
//!     "./models/gpt2/config.json".into(),
//! );
//! let report = scheduler.download_batch(vec![task], &BatchControl::default()).await;
//! println!("completed: {}, failed: {}", report.stats.completed, report.stats.failed);
//! # Ok(())
//! # }
//! ```

mod scheduler;
mod task;

pub use scheduler::{
    BatchControl, BatchReport, BatchStats, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_THROUGHPUT, DEFAULT_TIMEOUT_CEILING, DEFAULT_TIMEOUT_FLOOR, DownloadScheduler,
    DownloadStats, FileReport, MAX_CONCURRENCY, MAX_RETRIES_LIMIT, MIN_CONCURRENCY,
    SchedulerConfig, TimeoutPolicy, TransferOutcome,
};
pub use task::{DownloadTask, PART_SUFFIX, ProgressEvent, TaskStatus, part_path};
