//! Bounded-concurrency scheduler for download batches.
//!
//! The scheduler runs one Tokio task per [`DownloadTask`]. A semaphore bounds
//! how many transfers are in flight; the permit is held for the duration of a
//! transfer attempt and given back while a task waits out its retry backoff.
//!
//! # Concurrency Model
//!
//! - Admission happens in input order; a permit is acquired before a task is
//!   spawned, so at most `concurrency` transfers ever run at once
//! - The in-flight counter is incremented when an attempt starts and
//!   decremented by a drop guard, whatever the outcome
//! - Once the cancellation flag is raised no further task is admitted;
//!   running transfers finish or fail on their own
//!
//! # Retry Behavior
//!
//! - Transfers use a single HTTP attempt; retries are counted per task
//! - Only errors for which [`is_retryable`](crate::http::is_retryable) holds
//!   are retried, up to `max_retries` times
//! - A `429` with `Retry-After` waits exactly the advertised delay

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use super::task::{DownloadTask, ProgressEvent, ProgressSink, TaskStatus};
use crate::error::{ErrorCode, FileFailure, RepositoryError};
use crate::http::{HttpClient, RetryDecision, RetryPolicy};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of concurrent transfers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default retries per file after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Throughput assumed when sizing a transfer timeout (100 KiB/s).
pub const DEFAULT_MIN_THROUGHPUT: u64 = 100 * 1024;

/// Shortest transfer timeout (30 seconds).
pub const DEFAULT_TIMEOUT_FLOOR: Duration = Duration::from_secs(30);

/// Longest transfer timeout (6 hours).
pub const DEFAULT_TIMEOUT_CEILING: Duration = Duration::from_secs(6 * 60 * 60);

/// Size-scaled transfer timeout bounded by a floor and a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Bytes per second a healthy transfer is assumed to sustain.
    pub min_throughput: u64,
    pub floor: Duration,
    pub ceiling: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            min_throughput: DEFAULT_MIN_THROUGHPUT,
            floor: DEFAULT_TIMEOUT_FLOOR,
            ceiling: DEFAULT_TIMEOUT_CEILING,
        }
    }
}

impl TimeoutPolicy {
    /// Timeout for a transfer of `size` bytes; unknown sizes get the ceiling.
    #[must_use]
    pub fn timeout_for(&self, size: Option<u64>) -> Duration {
        let Some(size) = size else {
            return self.ceiling;
        };
        let secs = size / self.min_throughput.max(1);
        Duration::from_secs(secs).clamp(self.floor, self.ceiling.max(self.floor))
    }
}

/// Settings for [`DownloadScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub timeout: TimeoutPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: crate::http::constants::DEFAULT_BASE_DELAY,
            retry_max_delay: crate::http::constants::DEFAULT_MAX_DELAY,
            timeout: TimeoutPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Checks the numeric ranges.
    ///
    /// # Errors
    ///
    /// `InvalidParams` naming the offending field.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(RepositoryError::invalid_params(
                "concurrency",
                self.concurrency,
                format!("concurrency must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"),
            ));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(RepositoryError::invalid_params(
                "max_retries",
                self.max_retries,
                format!("max_retries must be at most {MAX_RETRIES_LIMIT}"),
            ));
        }
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries + 1,
            self.retry_base_delay,
            self.retry_max_delay,
        )
    }
}

/// Caller-side controls for one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchControl {
    /// Re-download files that already exist with the expected size.
    pub force: bool,
    /// Raised by the caller to stop admitting new tasks.
    pub cancel: Arc<AtomicBool>,
    pub progress: Option<UnboundedSender<ProgressEvent>>,
}

impl BatchControl {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Live counters for a running batch.
///
/// Uses atomic counters so that concurrent download tasks can update them
/// without locking.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    cancelled: AtomicUsize,
    retried: AtomicUsize,
    in_flight: AtomicUsize,
    peak_concurrency: AtomicUsize,
    downloaded_bytes: Arc<AtomicU64>,
}

impl DownloadStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Retry attempts across all tasks.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Transfers currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }

    /// Bytes received over the network, resumed bytes excluded.
    #[must_use]
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::Relaxed)
    }

    fn enter_slot(&self) -> SlotGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(now, Ordering::SeqCst);
        SlotGuard(self)
    }

    fn count(&self, outcome: TransferOutcome) {
        let counter = match outcome {
            TransferOutcome::Downloaded => &self.completed,
            TransferOutcome::Skipped => &self.skipped,
            TransferOutcome::Failed => &self.failed,
            TransferOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

struct SlotGuard<'a>(&'a DownloadStats);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Final state of one file in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOutcome {
    Downloaded,
    Skipped,
    Failed,
    Cancelled,
}

/// Per-file result, in batch input order.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: String,
    pub local_path: PathBuf,
    pub outcome: TransferOutcome,
    pub size: Option<u64>,
    /// Bytes on disk after the last attempt.
    pub bytes: u64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RepositoryError>,
}

impl FileReport {
    fn from_task(task: &DownloadTask, outcome: TransferOutcome, error: Option<RepositoryError>) -> Self {
        Self {
            path: task.file().path.clone(),
            local_path: task.target().to_path_buf(),
            outcome,
            size: task.file().size,
            bytes: task.bytes(),
            retry_count: task.retry_count(),
            error,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            TransferOutcome::Downloaded | TransferOutcome::Skipped
        )
    }
}

/// Aggregate figures for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total_files: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub retried: usize,
    /// Sum of the known sizes of every file in the batch.
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub peak_concurrency: usize,
    pub duration_ms: u64,
    pub interrupted: bool,
}

/// Outcome of [`DownloadScheduler::download_batch`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub stats: BatchStats,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.succeeded())
    }

    /// Failed files with their classified errors.
    #[must_use]
    pub fn failures(&self) -> Vec<FileFailure> {
        self.files
            .iter()
            .filter(|f| f.outcome == TransferOutcome::Failed)
            .filter_map(|f| {
                let error = f.error.as_ref()?;
                Some(FileFailure {
                    path: f.path.clone(),
                    code: error.code(),
                    message: error.message().to_string(),
                    retry_count: f.retry_count,
                })
            })
            .collect()
    }

    /// True when files failed and none succeeded.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.stats.failed > 0 && self.stats.completed + self.stats.skipped == 0
    }
}

/// Runs download batches against one HTTP client.
#[derive(Debug, Clone)]
pub struct DownloadScheduler {
    http: Arc<HttpClient>,
    config: SchedulerConfig,
}

impl DownloadScheduler {
    /// # Errors
    ///
    /// `InvalidParams` when `config` is out of range.
    #[instrument(level = "debug", skip(http))]
    pub fn new(http: Arc<HttpClient>, config: SchedulerConfig) -> Result<Self, RepositoryError> {
        config.validate()?;
        debug!(
            concurrency = config.concurrency,
            max_retries = config.max_retries,
            "creating download scheduler"
        );
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Downloads every task, returning one report per task in input order.
    ///
    /// Individual failures never fail the call; they are reported per file.
    #[instrument(skip(self, tasks, control), fields(tasks = tasks.len(), concurrency = self.config.concurrency))]
    pub async fn download_batch(&self, tasks: Vec<DownloadTask>, control: &BatchControl) -> BatchReport {
        let started = Instant::now();
        let stats = Arc::new(DownloadStats::new());
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let sink = ProgressSink {
            events: control.progress.clone(),
            received: Arc::clone(&stats.downloaded_bytes),
        };
        let total_files = tasks.len();
        let total_bytes = tasks.iter().filter_map(|t| t.file().size).sum();

        info!(total_files, total_bytes, "starting download batch");

        let mut handles = Vec::with_capacity(total_files);
        let mut reports: Vec<Option<FileReport>> = Vec::with_capacity(total_files);
        let mut remaining = tasks.into_iter();

        for task in remaining.by_ref() {
            if control.is_cancelled() {
                stats.count(TransferOutcome::Cancelled);
                reports.push(Some(FileReport::from_task(&task, TransferOutcome::Cancelled, None)));
                break;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                warn!("download semaphore closed");
                stats.count(TransferOutcome::Cancelled);
                reports.push(Some(FileReport::from_task(&task, TransferOutcome::Cancelled, None)));
                break;
            };
            if control.is_cancelled() {
                drop(permit);
                stats.count(TransferOutcome::Cancelled);
                reports.push(Some(FileReport::from_task(&task, TransferOutcome::Cancelled, None)));
                break;
            }

            let http = Arc::clone(&self.http);
            let stats_task = Arc::clone(&stats);
            let semaphore_task = Arc::clone(&semaphore);
            let sink = sink.clone();
            let cancel = Arc::clone(&control.cancel);
            let policy = self.config.retry_policy();
            let timeout = self.config.timeout.timeout_for(task.file().size);
            let force = control.force;
            let fallback = FileReport::from_task(&task, TransferOutcome::Failed, None);

            reports.push(None);
            handles.push((
                reports.len() - 1,
                fallback,
                tokio::spawn(async move {
                    run_task(
                        task,
                        permit,
                        TaskContext {
                            http: &http,
                            stats: &stats_task,
                            semaphore: &semaphore_task,
                            sink: &sink,
                            cancel: &cancel,
                            policy: &policy,
                            timeout,
                            force,
                        },
                    )
                    .await
                }),
            ));
        }

        for task in remaining {
            stats.count(TransferOutcome::Cancelled);
            reports.push(Some(FileReport::from_task(&task, TransferOutcome::Cancelled, None)));
        }

        debug!(task_count = handles.len(), "waiting for downloads to complete");

        for (index, fallback, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(path = %fallback.path, error = %e, "download task panicked");
                    stats.count(TransferOutcome::Failed);
                    FileReport {
                        error: Some(RepositoryError::new(
                            ErrorCode::NetworkError,
                            format!("download task for {} aborted: {e}", fallback.path),
                        )),
                        ..fallback
                    }
                }
            };
            reports[index] = Some(report);
        }

        let files: Vec<FileReport> = reports.into_iter().flatten().collect();
        let batch_stats = BatchStats {
            total_files,
            completed: stats.completed(),
            failed: stats.failed(),
            skipped: stats.skipped(),
            cancelled: stats.cancelled(),
            retried: stats.retried(),
            total_bytes,
            downloaded_bytes: stats.downloaded_bytes(),
            peak_concurrency: stats.peak_concurrency(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            interrupted: control.is_cancelled(),
        };

        info!(
            completed = batch_stats.completed,
            failed = batch_stats.failed,
            skipped = batch_stats.skipped,
            cancelled = batch_stats.cancelled,
            retried = batch_stats.retried,
            downloaded_bytes = batch_stats.downloaded_bytes,
            "download batch complete"
        );

        BatchReport {
            files,
            stats: batch_stats,
        }
    }
}

struct TaskContext<'a> {
    http: &'a HttpClient,
    stats: &'a DownloadStats,
    semaphore: &'a Arc<Semaphore>,
    sink: &'a ProgressSink,
    cancel: &'a AtomicBool,
    policy: &'a RetryPolicy,
    timeout: Duration,
    force: bool,
}

/// Drives one task through `pending → running → {done | failed}`.
#[instrument(skip_all, fields(path = %task.file().path))]
async fn run_task(
    mut task: DownloadTask,
    permit: tokio::sync::OwnedSemaphorePermit,
    ctx: TaskContext<'_>,
) -> FileReport {
    let mut permit = Some(permit);

    if !ctx.force && task.is_complete_on_disk().await {
        debug!("target already present, skipping");
        let size = task.file().size;
        if let Some(events) = &ctx.sink.events {
            let _ = events.send(ProgressEvent {
                path: task.file().path.clone(),
                downloaded: size.unwrap_or(0),
                total: size,
            });
        }
        task.set_status(TaskStatus::Done);
        ctx.stats.count(TransferOutcome::Skipped);
        let mut report = FileReport::from_task(&task, TransferOutcome::Skipped, None);
        report.bytes = size.unwrap_or(0);
        return report;
    }

    let mut attempt = 0u32;
    let mut last_error = None;
    loop {
        attempt += 1;
        let slot = match permit.take() {
            Some(held) => held,
            None => match Arc::clone(ctx.semaphore).acquire_owned().await {
                Ok(held) => held,
                Err(_) => {
                    ctx.stats.count(TransferOutcome::Cancelled);
                    return FileReport::from_task(&task, TransferOutcome::Cancelled, last_error);
                }
            },
        };
        if attempt > 1 && ctx.cancel.load(Ordering::SeqCst) {
            drop(slot);
            debug!("cancelled while waiting for a retry slot");
            ctx.stats.count(TransferOutcome::Cancelled);
            return FileReport::from_task(&task, TransferOutcome::Cancelled, last_error);
        }

        task.set_status(TaskStatus::Running);
        let result = {
            let _guard = ctx.stats.enter_slot();
            task.transfer(ctx.http, ctx.timeout, ctx.sink).await
        };
        drop(slot);

        let error = match result {
            Ok(bytes) => {
                task.set_status(TaskStatus::Done);
                ctx.stats.count(TransferOutcome::Downloaded);
                info!(bytes, retries = task.retry_count(), "file downloaded");
                return FileReport::from_task(&task, TransferOutcome::Downloaded, None);
            }
            Err(error) => error,
        };
        task.set_status(TaskStatus::Failed);

        match ctx.policy.should_retry(&error, attempt) {
            RetryDecision::Retry { delay, attempt: next_attempt } => {
                if ctx.cancel.load(Ordering::SeqCst) {
                    debug!("cancelled before retry");
                    ctx.stats.count(TransferOutcome::Cancelled);
                    return FileReport::from_task(&task, TransferOutcome::Cancelled, Some(error));
                }
                warn!(
                    attempt = next_attempt,
                    max_attempts = ctx.policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    code = %error.code(),
                    error = %error,
                    "retrying download"
                );
                tokio::time::sleep(delay).await;
                if ctx.cancel.load(Ordering::SeqCst) {
                    debug!("cancelled during backoff");
                    ctx.stats.count(TransferOutcome::Cancelled);
                    return FileReport::from_task(&task, TransferOutcome::Cancelled, Some(error));
                }
                task.record_retry();
                ctx.stats.retried.fetch_add(1, Ordering::SeqCst);
                last_error = Some(error);
            }
            RetryDecision::DoNotRetry { reason } => {
                warn!(
                    code = %error.code(),
                    error = %error,
                    attempts = attempt,
                    %reason,
                    "download failed"
                );
                ctx.stats.count(TransferOutcome::Failed);
                return FileReport::from_task(&task, TransferOutcome::Failed, Some(error));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Config Tests ====================

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(1000));
        assert_eq!(config.retry_max_delay, Duration::from_millis(30_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_concurrency() {
        let config = SchedulerConfig {
            concurrency: 0,
            ..SchedulerConfig::default()
        };
        let error = config.validate().unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidParams);
        assert_eq!(error.details().unwrap().field.as_deref(), Some("concurrency"));
    }

    #[test]
    fn test_config_rejects_excessive_retries() {
        let config = SchedulerConfig {
            max_retries: MAX_RETRIES_LIMIT + 1,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_allows_max_retries_plus_one_attempts() {
        let config = SchedulerConfig {
            max_retries: 3,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.retry_policy().max_attempts(), 4);
    }

    // ==================== Timeout Tests ====================

    #[test]
    fn test_timeout_small_file_uses_floor() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.timeout_for(Some(1024)), Duration::from_secs(30));
    }

    #[test]
    fn test_timeout_scales_with_size() {
        let policy = TimeoutPolicy::default();
        // 100 MiB at 100 KiB/s
        assert_eq!(
            policy.timeout_for(Some(100 * 1024 * 1024)),
            Duration::from_secs(1024)
        );
    }

    #[test]
    fn test_timeout_capped_at_ceiling() {
        let policy = TimeoutPolicy::default();
        assert_eq!(
            policy.timeout_for(Some(u64::MAX)),
            Duration::from_secs(6 * 60 * 60)
        );
        assert_eq!(policy.timeout_for(None), Duration::from_secs(6 * 60 * 60));
    }

    // ==================== Stats Tests ====================

    #[test]
    fn test_slot_guard_tracks_peak() {
        let stats = DownloadStats::new();
        {
            let _a = stats.enter_slot();
            let _b = stats.enter_slot();
            assert_eq!(stats.in_flight(), 2);
        }
        assert_eq!(stats.in_flight(), 0);
        assert_eq!(stats.peak_concurrency(), 2);
    }

    #[test]
    fn test_stats_count_outcomes() {
        let stats = DownloadStats::new();
        stats.count(TransferOutcome::Downloaded);
        stats.count(TransferOutcome::Skipped);
        stats.count(TransferOutcome::Failed);
        stats.count(TransferOutcome::Cancelled);
        assert_eq!(
            (stats.completed(), stats.skipped(), stats.failed(), stats.cancelled()),
            (1, 1, 1, 1)
        );
    }

    #[test]
    fn test_batch_all_failed() {
        let report = BatchReport {
            files: Vec::new(),
            stats: BatchStats {
                failed: 2,
                ..BatchStats::default()
            },
        };
        assert!(report.all_failed());

        let partial = BatchReport {
            files: Vec::new(),
            stats: BatchStats {
                failed: 2,
                skipped: 1,
                ..BatchStats::default()
            },
        };
        assert!(!partial.all_failed());
    }
}
