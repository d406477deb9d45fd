//! The fetch engine façade: `list`, `explore` and `download`.
//!
//! [`FetchEngine`] wires one [`HttpClient`], one listing cache and one
//! [`DownloadScheduler`] together. Every operation validates its input
//! before the first request is sent and returns either a serializable
//! result or a [`RepositoryError`].
//!
//! # Example
//!
//! ```no_run
//! use repofetch_core::engine::{EngineConfig, FetchEngine, ListOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = FetchEngine::new(EngineConfig::default())?;
//! let result = engine
//!     .list("gpt2/gpt2", &ListOptions::default().with_include(["*.json"]))
//!     .await?;
//! for file in &result.files {
//!     println!("{} {:?}", file.path, file.size);
//! }
//! # Ok(())
//! # }
//! ```

mod explore;
mod format;
mod options;
mod suggest;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument};

pub use explore::{NodeKind, TreeNode, TreeStats, build_tree, render_tree};
pub use format::{format_duration, format_size};
pub use options::{
    DEFAULT_EXPLORE_MAX_FILES, DEFAULT_REVISION, DownloadOptions, ExploreOptions, ListMode,
    ListOptions, SortBy, parse_size,
};
pub use suggest::ModelKind;

use crate::cache::CacheConfig;
use crate::download::{
    BatchControl, BatchStats, DownloadScheduler, DownloadTask, FileReport, SchedulerConfig,
};
use crate::endpoints::Endpoints;
use crate::error::{ErrorCode, ErrorDetails, RepositoryError};
use crate::http::{HttpClient, HttpClientConfig};
use crate::repo_id::{RepositoryId, safe_join};
use crate::walk::{
    DEFAULT_LISTING_TTL, DirectoryWalker, FileEntry, FileFilter, ListingCache, ListingSource,
    WalkBudget, WalkReport, extension_of,
};

/// Everything needed to build a [`FetchEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoints: Endpoints,
    pub token: Option<String>,
    pub http: HttpClientConfig,
    pub cache: CacheConfig,
    /// Lifetime of cached directory listings.
    pub listing_ttl: Duration,
    pub download: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            token: None,
            http: HttpClientConfig::default(),
            cache: CacheConfig::default(),
            listing_ttl: DEFAULT_LISTING_TTL,
            download: SchedulerConfig::default(),
        }
    }
}

/// Aggregates over a list result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListStats {
    pub returned_files: usize,
    /// Files matched by the walk before any truncation of the result.
    pub total_files: usize,
    pub total_size: u64,
    pub file_types: BTreeMap<String, usize>,
    /// Distinct parent directories of the returned files.
    pub directory_count: usize,
}

/// Result of [`FetchEngine::list`].
#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub repo_id: String,
    pub revision: String,
    pub path: String,
    pub mode: ListMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub files: Vec<FileEntry>,
    pub stats: ListStats,
    pub truncated: bool,
    pub truncated_paths: Vec<String>,
    pub skipped_paths: Vec<String>,
    pub duration_ms: u64,
    pub suggestions: Vec<String>,
}

/// Result of [`FetchEngine::explore`].
#[derive(Debug, Clone, Serialize)]
pub struct TreeStructure {
    pub repo_id: String,
    /// Name of the starting directory (the repository name at the root).
    pub name: String,
    pub revision: String,
    pub path: String,
    pub children: Vec<TreeNode>,
    pub stats: TreeStats,
    pub truncated: bool,
    pub truncated_paths: Vec<String>,
    pub skipped_paths: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_view: Option<String>,
    pub suggestions: Vec<String>,
}

/// Result of [`FetchEngine::download`].
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub repo_id: String,
    pub revision: String,
    pub target_dir: PathBuf,
    pub files: Vec<FileReport>,
    pub stats: BatchStats,
    /// Human-readable size of the selection.
    pub size: String,
    pub duration: String,
    pub summary: String,
    pub truncated: bool,
    pub truncated_paths: Vec<String>,
    pub skipped_paths: Vec<String>,
    pub suggestions: Vec<String>,
}

impl DownloadResult {
    /// True when some files failed while others succeeded.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.stats.failed > 0
    }
}

/// List, explore and download over one shared client and cache.
#[derive(Debug, Clone)]
pub struct FetchEngine {
    http: Arc<HttpClient>,
    cache: Arc<ListingCache>,
    source: ListingSource,
    scheduler: DownloadScheduler,
}

impl FetchEngine {
    /// Builds the client, cache and scheduler from `config`.
    ///
    /// The cache sweep starts only when called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// `InvalidParams` for an out-of-range scheduler config, `NetworkError`
    /// when the HTTP client cannot be built.
    pub fn new(config: EngineConfig) -> Result<Self, RepositoryError> {
        let http = Arc::new(HttpClient::new(config.http.clone())?);
        let cache = ListingCache::shared(config.cache.clone());
        Self::with_parts(http, cache, config)
    }

    /// Builds an engine around an existing client and cache.
    ///
    /// # Errors
    ///
    /// `InvalidParams` for an out-of-range scheduler config.
    pub fn with_parts(
        http: Arc<HttpClient>,
        cache: Arc<ListingCache>,
        config: EngineConfig,
    ) -> Result<Self, RepositoryError> {
        if config.token.is_some() {
            http.set_token(config.token.clone());
        }
        let source = ListingSource::new(
            Arc::clone(&http),
            Arc::clone(&cache),
            config.endpoints.clone(),
            config.listing_ttl,
        );
        let scheduler = DownloadScheduler::new(Arc::clone(&http), config.download)?;
        Ok(Self {
            http,
            cache,
            source,
            scheduler,
        })
    }

    #[must_use]
    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ListingCache> {
        &self.cache
    }

    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        self.source.endpoints()
    }

    /// Installs or clears the bearer token for later requests.
    pub fn set_token(&self, token: Option<String>) {
        self.http.set_token(token);
    }

    /// Lists files under a repository path.
    ///
    /// # Errors
    ///
    /// Validation errors before any request; the classified failure of the
    /// root listing otherwise.
    #[instrument(skip(self, options), fields(revision = %options.revision, mode = %options.mode))]
    pub async fn list(&self, repo_id: &str, options: &ListOptions) -> Result<ListResult, RepositoryError> {
        let started = Instant::now();
        let repo = RepositoryId::parse(repo_id)?;
        let path = options.validate()?;
        let filter = options.filter()?;

        let (mut files, report) = self
            .walk(&repo, &options.revision, &path, filter, options.budget())
            .await?;
        sort_files(&mut files, options.sort);

        let truncated = report.truncated();
        let stats = list_stats(&files, report.files_yielded);
        let suggestions = suggest::for_listing(&files, truncated, !options.include.is_empty());
        info!(
            repo = %repo,
            files = files.len(),
            truncated,
            "list complete"
        );

        Ok(ListResult {
            repo_id: repo.to_string(),
            revision: options.revision.clone(),
            path,
            mode: options.mode,
            query: options.query.clone(),
            files,
            stats,
            truncated,
            truncated_paths: report.truncated_paths,
            skipped_paths: report.skipped_paths,
            duration_ms: elapsed_ms(started),
            suggestions,
        })
    }

    /// Scans the directory structure under a repository path.
    ///
    /// # Errors
    ///
    /// Validation errors before any request; the classified failure of the
    /// root listing otherwise.
    #[instrument(skip(self, options), fields(revision = %options.revision))]
    pub async fn explore(
        &self,
        repo_id: &str,
        options: &ExploreOptions,
    ) -> Result<TreeStructure, RepositoryError> {
        let started = Instant::now();
        let repo = RepositoryId::parse(repo_id)?;
        let path = options.validate()?;
        let budget = WalkBudget::new(options.max_depth, options.max_files);

        let (files, report) = self
            .walk(&repo, &options.revision, &path, FileFilter::new(), budget)
            .await?;
        let (children, stats) = build_tree(&path, &files, &report.directories);
        let tree_view = options.tree_view.then(|| render_tree(&children));
        let truncated = report.truncated();
        let suggestions = suggest::for_listing(&files, truncated, false);
        let name = path
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(repo.name())
            .to_string();

        info!(
            repo = %repo,
            files = stats.total_files,
            directories = stats.total_directories,
            truncated,
            "explore complete"
        );

        Ok(TreeStructure {
            repo_id: repo.to_string(),
            name,
            revision: options.revision.clone(),
            path,
            children,
            stats,
            truncated,
            truncated_paths: report.truncated_paths,
            skipped_paths: report.skipped_paths,
            duration_ms: elapsed_ms(started),
            tree_view,
            suggestions,
        })
    }

    /// Downloads the selected files into `target_dir`, mirroring their
    /// repository paths.
    ///
    /// Succeeds when at least one file was downloaded or already present;
    /// per-file failures are reported in the result.
    ///
    /// # Errors
    ///
    /// Validation errors before any request, `NotFound` when nothing matched
    /// the selection, the root listing failure, or, when every file failed,
    /// an error carrying the first failure's code and all failures in its
    /// details.
    #[instrument(skip(self, options), fields(target_dir = %target_dir.display()))]
    pub async fn download(
        &self,
        repo_id: &str,
        target_dir: &Path,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, RepositoryError> {
        let started = Instant::now();
        let repo = RepositoryId::parse(repo_id)?;
        let path = options.validate()?;
        let list = &options.list;

        let scheduler = self.scheduler_for(options)?;
        let filter = if options.files.is_empty() {
            list.filter()?
        } else {
            FileFilter::new().paths(&options.files)
        };

        let (files, report) = self
            .walk(&repo, &list.revision, &path, filter, list.budget())
            .await?;

        if files.is_empty() {
            return Err(RepositoryError::new(
                ErrorCode::NotFound,
                format!("no files in {repo} matched the selection"),
            )
            .with_suggestion("Check the repository id and filters"));
        }

        let mut tasks = Vec::with_capacity(files.len());
        for file in &files {
            let target = safe_join(target_dir, &file.path)?;
            let url = self.endpoints().resolve_url(&repo, &list.revision, &file.path);
            tasks.push(DownloadTask::new(file.clone(), url, target));
        }
        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| RepositoryError::local_io(target_dir, &e))?;

        debug!(repo = %repo, files = tasks.len(), "starting download");
        let control = BatchControl {
            force: options.force,
            cancel: Arc::clone(&options.cancel),
            progress: options.progress.clone(),
        };
        let batch = scheduler.download_batch(tasks, &control).await;

        if batch.all_failed() {
            let failures = batch.failures();
            let code = failures
                .first()
                .map_or(ErrorCode::NetworkError, |f| f.code);
            return Err(RepositoryError::new(
                code,
                format!("all {} downloads from {repo} failed", failures.len()),
            )
            .with_details(ErrorDetails {
                failures,
                ..ErrorDetails::default()
            }));
        }

        let mut suggestions = suggest::for_download(&batch.stats);
        suggestions.extend(suggest::for_listing(
            &files,
            report.truncated(),
            !list.include.is_empty() || !options.files.is_empty(),
        ));
        let summary = summarize(&batch.stats);
        let duration = format_duration(elapsed_ms(started));
        info!(repo = %repo, %summary, "download complete");

        Ok(DownloadResult {
            repo_id: repo.to_string(),
            revision: list.revision.clone(),
            target_dir: target_dir.to_path_buf(),
            size: format_size(batch.stats.total_bytes),
            files: batch.files,
            stats: batch.stats,
            duration,
            summary,
            truncated: report.truncated(),
            truncated_paths: report.truncated_paths,
            skipped_paths: report.skipped_paths,
            suggestions,
        })
    }

    fn scheduler_for(&self, options: &DownloadOptions) -> Result<DownloadScheduler, RepositoryError> {
        if options.concurrency.is_none() && options.max_retries.is_none() {
            return Ok(self.scheduler.clone());
        }
        let mut config = self.scheduler.config().clone();
        if let Some(concurrency) = options.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_retries) = options.max_retries {
            config.max_retries = max_retries;
        }
        DownloadScheduler::new(Arc::clone(&self.http), config)
    }

    async fn walk(
        &self,
        repo: &RepositoryId,
        revision: &str,
        path: &str,
        filter: FileFilter,
        budget: WalkBudget,
    ) -> Result<(Vec<FileEntry>, WalkReport), RepositoryError> {
        DirectoryWalker::new(
            self.source.clone(),
            repo.clone(),
            revision,
            path,
            filter,
            budget,
        )
        .collect()
        .await
    }
}

fn sort_files(files: &mut [FileEntry], sort: SortBy) {
    match sort {
        SortBy::Name => files.sort_by(|a, b| a.path.cmp(&b.path)),
        SortBy::Size => files.sort_by(|a, b| {
            b.size
                .unwrap_or(0)
                .cmp(&a.size.unwrap_or(0))
                .then_with(|| a.path.cmp(&b.path))
        }),
        SortBy::Type => files.sort_by(|a, b| {
            a.extension()
                .cmp(&b.extension())
                .then_with(|| a.path.cmp(&b.path))
        }),
    }
}

fn list_stats(files: &[FileEntry], total_files: usize) -> ListStats {
    let mut file_types = BTreeMap::new();
    let mut directories = BTreeSet::new();
    for file in files {
        *file_types.entry(extension_of(&file.path)).or_insert(0) += 1;
        if let Some((dir, _)) = file.path.rsplit_once('/') {
            directories.insert(dir);
        }
    }
    ListStats {
        returned_files: files.len(),
        total_files,
        total_size: files.iter().filter_map(|f| f.size).sum(),
        file_types,
        directory_count: directories.len(),
    }
}

fn summarize(stats: &BatchStats) -> String {
    let mut summary = format!(
        "Downloaded {} of {} files ({} transferred)",
        stats.completed,
        stats.total_files,
        format_size(stats.downloaded_bytes)
    );
    for (count, label) in [
        (stats.skipped, "already present"),
        (stats.failed, "failed"),
        (stats.cancelled, "cancelled"),
    ] {
        if count > 0 {
            summary.push_str(&format!(", {count} {label}"));
        }
    }
    summary
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
