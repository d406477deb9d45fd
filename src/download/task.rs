//! A single file transfer: temp file, byte-range resume, verification and
//! the final atomic rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, HeaderValue, RANGE};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument};

use crate::error::RepositoryError;
use crate::http::{HttpClient, RawFailure, RequestOptions, classify};
use crate::walk::FileEntry;

/// Suffix appended to the target path while a transfer is incomplete.
pub const PART_SUFFIX: &str = ".part";

/// Lifecycle of a [`DownloadTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// Byte progress for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub path: String,
    /// Bytes present in the temp file, including resumed bytes.
    pub downloaded: u64,
    pub total: Option<u64>,
}

/// Sink shared by the tasks of one batch.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgressSink {
    pub(crate) events: Option<UnboundedSender<ProgressEvent>>,
    pub(crate) received: Arc<AtomicU64>,
}

impl ProgressSink {
    fn record(&self, path: &str, chunk: u64, downloaded: u64, total: Option<u64>) {
        self.received.fetch_add(chunk, Ordering::Relaxed);
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = events.send(ProgressEvent {
                path: path.to_string(),
                downloaded,
                total,
            });
        }
    }
}

/// One file admitted into a download batch.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    file: FileEntry,
    url: String,
    target: PathBuf,
    temp: PathBuf,
    status: TaskStatus,
    retry_count: u32,
    bytes: u64,
}

impl DownloadTask {
    #[must_use]
    pub fn new(file: FileEntry, url: impl Into<String>, target: PathBuf) -> Self {
        let temp = part_path(&target);
        Self {
            file,
            url: url.into(),
            target,
            temp,
            status: TaskStatus::Pending,
            retry_count: 0,
            bytes: 0,
        }
    }

    #[must_use]
    pub fn file(&self) -> &FileEntry {
        &self.file
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    #[must_use]
    pub fn temp(&self) -> &Path {
        &self.temp
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Bytes on disk for this file after the last attempt.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    pub(crate) fn record_retry(&mut self) {
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
    }

    /// Whether the final file already exists with the expected size.
    /// With no known size, any existing file counts.
    pub async fn is_complete_on_disk(&self) -> bool {
        match tokio::fs::metadata(&self.target).await {
            Ok(meta) if meta.is_file() => self.file.size.is_none_or(|size| size == meta.len()),
            _ => false,
        }
    }

    /// Performs one transfer attempt, returning the final file size.
    ///
    /// Resumes from an existing `.part` file with a `Range` request when the
    /// expected size is known and larger than what is on disk. A `200` reply
    /// to a range request restarts from zero. The temp file is renamed onto
    /// the target only after its size is verified.
    ///
    /// # Errors
    ///
    /// The classified HTTP or stream failure, a `NetworkError` for a size
    /// mismatch (the `.part` file is removed), or a local I/O failure.
    #[instrument(skip(self, http, progress), fields(path = %self.file.path, url = %self.url))]
    pub(crate) async fn transfer(
        &mut self,
        http: &HttpClient,
        timeout: Duration,
        progress: &ProgressSink,
    ) -> Result<u64, RepositoryError> {
        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RepositoryError::local_io(parent, &e))?;
        }

        let expected = self.file.size;
        let mut existing = match tokio::fs::metadata(&self.temp).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        if existing > 0 {
            match expected {
                Some(size) if existing == size => {
                    debug!(bytes = existing, "temp file already complete");
                    return self.finalize(existing).await;
                }
                Some(size) if existing < size => {}
                _ => {
                    debug!(bytes = existing, "discarding unusable temp file");
                    remove_quietly(&self.temp).await;
                    existing = 0;
                }
            }
        }

        let mut options = RequestOptions::single_attempt();
        options.timeout = Some(timeout);
        let resume = existing > 0;
        if resume {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes={existing}-")) {
                options.headers.insert(RANGE, value);
            }
        }

        let response = http.download(&self.url, &options).await?;
        let resumed = resume && response.status() == StatusCode::PARTIAL_CONTENT;
        if resume && !resumed {
            debug!(status = %response.status(), "range not honoured, restarting from zero");
            existing = 0;
        }
        let expected = expected.or_else(|| total_content_length(&response, existing));

        let file = if resumed {
            let mut handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.temp)
                .await
                .map_err(|e| RepositoryError::local_io(&self.temp, &e))?;
            handle
                .seek(std::io::SeekFrom::End(0))
                .await
                .map_err(|e| RepositoryError::local_io(&self.temp, &e))?;
            handle
        } else {
            File::create(&self.temp)
                .await
                .map_err(|e| RepositoryError::local_io(&self.temp, &e))?
        };

        let written = self
            .stream_to_file(file, response, existing, expected, progress)
            .await?;
        let final_size = existing.saturating_add(written);
        self.bytes = final_size;

        if let Some(expected) = expected {
            if final_size != expected {
                remove_quietly(&self.temp).await;
                self.bytes = 0;
                return Err(RepositoryError::size_mismatch(
                    &self.file.path,
                    expected,
                    final_size,
                ));
            }
        }

        info!(bytes = final_size, resumed, "transfer complete");
        self.finalize(final_size).await
    }

    async fn stream_to_file(
        &mut self,
        file: File,
        response: reqwest::Response,
        existing: u64,
        expected: Option<u64>,
        progress: &ProgressSink,
    ) -> Result<u64, RepositoryError> {
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Keep what arrived so the next attempt can resume.
                    let _ = writer.flush().await;
                    self.bytes = existing + written;
                    return Err(classify(&RawFailure::from_reqwest(&self.url, &e)));
                }
            };
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| RepositoryError::local_io(&self.temp, &e))?;
            written += chunk.len() as u64;
            progress.record(&self.file.path, chunk.len() as u64, existing + written, expected);
        }

        writer
            .flush()
            .await
            .map_err(|e| RepositoryError::local_io(&self.temp, &e))?;
        Ok(written)
    }

    async fn finalize(&mut self, size: u64) -> Result<u64, RepositoryError> {
        tokio::fs::rename(&self.temp, &self.target)
            .await
            .map_err(|e| RepositoryError::local_io(&self.target, &e))?;
        self.bytes = size;
        Ok(size)
    }
}

/// `<target>.part`
#[must_use]
pub fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

fn total_content_length(response: &reqwest::Response, existing: u64) -> Option<u64> {
    let current = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if response.status() == StatusCode::PARTIAL_CONTENT {
        current.map(|remaining| existing.saturating_add(remaining))
    } else {
        current
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "temp file not removed");
    }
}
