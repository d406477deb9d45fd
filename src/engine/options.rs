//! Per-call options for list, explore and download.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::download::ProgressEvent;
use crate::error::{ErrorCode, RepositoryError};
use crate::repo_id::{is_path_safe, normalize_sub_path};
use crate::walk::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_FILES, FileCategory, FileFilter, WalkBudget};

/// Revision used when none is given.
pub const DEFAULT_REVISION: &str = "main";

/// File ceiling for explore scans.
pub const DEFAULT_EXPLORE_MAX_FILES: usize = 1000;

/// Ordering of list results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// By path.
    #[default]
    Name,
    /// Largest first.
    Size,
    /// By extension.
    Type,
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Name => "name",
            Self::Size => "size",
            Self::Type => "type",
        })
    }
}

impl FromStr for SortBy {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" | "path" => Ok(Self::Name),
            "size" => Ok(Self::Size),
            "type" | "ext" | "extension" => Ok(Self::Type),
            other => Err(RepositoryError::invalid_params(
                "sort",
                other,
                "sort must be one of name, size, type",
            )),
        }
    }
}

/// How `list` selects files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMode {
    #[default]
    Standard,
    /// Path search driven by [`ListOptions::query`].
    Search,
}

impl fmt::Display for ListMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "standard",
            Self::Search => "search",
        })
    }
}

impl FromStr for ListMode {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "search" => Ok(Self::Search),
            other => Err(RepositoryError::invalid_params(
                "mode",
                other,
                "mode must be standard or search",
            )),
        }
    }
}

/// Options for [`FetchEngine::list`](super::FetchEngine::list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub revision: String,
    /// Sub-directory to start from; empty for the repository root.
    pub path: String,
    /// `false` lists only the starting directory.
    pub recursive: bool,
    pub max_files: usize,
    pub max_depth: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub categories: Vec<FileCategory>,
    pub sort: SortBy,
    pub mode: ListMode,
    pub query: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            revision: DEFAULT_REVISION.to_string(),
            path: String::new(),
            recursive: true,
            max_files: DEFAULT_MAX_FILES,
            max_depth: DEFAULT_MAX_DEPTH,
            include: Vec::new(),
            exclude: Vec::new(),
            min_size: None,
            max_size: None,
            categories: Vec::new(),
            sort: SortBy::default(),
            mode: ListMode::default(),
            query: None,
        }
    }
}

impl ListOptions {
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    #[must_use]
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_include<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.include.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_exclude<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_size_range(mut self, min_size: Option<u64>, max_size: Option<u64>) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = FileCategory>) -> Self {
        self.categories.extend(categories);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortBy) -> Self {
        self.sort = sort;
        self
    }

    /// Switches to search mode with `query`.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.mode = ListMode::Search;
        self.query = Some(query.into());
        self
    }

    /// Checks limits and paths, returning the normalized sub-path.
    ///
    /// # Errors
    ///
    /// `InvalidParams` for a zero file limit or an empty search query,
    /// `PathTraversal` for an unsafe `path` or `revision`.
    pub fn validate(&self) -> Result<String, RepositoryError> {
        if self.max_files == 0 {
            return Err(RepositoryError::invalid_params(
                "max_files",
                self.max_files,
                "max_files must be at least 1",
            ));
        }
        validate_revision(&self.revision)?;
        if self.mode == ListMode::Search
            && self.query.as_deref().is_none_or(|q| q.trim().is_empty())
        {
            return Err(RepositoryError::invalid_params(
                "query",
                "",
                "search mode needs a non-empty query",
            ));
        }
        normalize_sub_path("path", &self.path)
    }

    /// Compiles the selection into a [`FileFilter`].
    ///
    /// # Errors
    ///
    /// `InvalidParams` for a malformed glob or an inverted size range.
    pub fn filter(&self) -> Result<FileFilter, RepositoryError> {
        let mut filter = FileFilter::new()
            .include(&self.include)?
            .exclude(&self.exclude)?
            .size_range(self.min_size, self.max_size)?
            .categories(&self.categories);
        if self.mode == ListMode::Search {
            if let Some(query) = &self.query {
                filter = filter.query(query)?;
            }
        }
        Ok(filter)
    }

    /// Depth and file limits for the walk.
    #[must_use]
    pub fn budget(&self) -> WalkBudget {
        let depth = if self.recursive { self.max_depth } else { 0 };
        WalkBudget::new(depth, self.max_files)
    }
}

/// Options for [`FetchEngine::explore`](super::FetchEngine::explore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploreOptions {
    pub revision: String,
    pub path: String,
    pub max_depth: usize,
    pub max_files: usize,
    /// Render the ASCII tree alongside the structure.
    pub tree_view: bool,
}

impl Default for ExploreOptions {
    fn default() -> Self {
        Self {
            revision: DEFAULT_REVISION.to_string(),
            path: String::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_files: DEFAULT_EXPLORE_MAX_FILES,
            tree_view: false,
        }
    }
}

impl ExploreOptions {
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    #[must_use]
    pub fn with_tree_view(mut self, tree_view: bool) -> Self {
        self.tree_view = tree_view;
        self
    }

    /// # Errors
    ///
    /// Same rules as [`ListOptions::validate`].
    pub fn validate(&self) -> Result<String, RepositoryError> {
        if self.max_files == 0 {
            return Err(RepositoryError::invalid_params(
                "max_files",
                self.max_files,
                "max_files must be at least 1",
            ));
        }
        validate_revision(&self.revision)?;
        normalize_sub_path("path", &self.path)
    }
}

/// Options for [`FetchEngine::download`](super::FetchEngine::download).
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// File selection; sorting and mode are ignored.
    pub list: ListOptions,
    /// Restricts the batch to these repository paths.
    pub files: Vec<String>,
    /// Re-download files that already exist with the expected size.
    pub force: bool,
    /// Overrides the configured concurrency.
    pub concurrency: Option<usize>,
    /// Overrides the configured retry ceiling.
    pub max_retries: Option<u32>,
    /// Raised to stop admitting new transfers.
    pub cancel: Arc<AtomicBool>,
    pub progress: Option<UnboundedSender<ProgressEvent>>,
}

impl DownloadOptions {
    #[must_use]
    pub fn with_list(mut self, list: ListOptions) -> Self {
        self.list = list;
        self
    }

    #[must_use]
    pub fn with_files<S: Into<String>>(mut self, files: impl IntoIterator<Item = S>) -> Self {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validates the selection and every named file.
    ///
    /// # Errors
    ///
    /// As [`ListOptions::validate`], plus `PathTraversal` for an unsafe
    /// entry in `files`.
    pub fn validate(&self) -> Result<String, RepositoryError> {
        let path = self.list.validate()?;
        for file in &self.files {
            if file.trim().is_empty() || !is_path_safe(file) || file.contains("//") {
                return Err(RepositoryError::path_traversal("files", file));
            }
        }
        Ok(path)
    }
}

fn validate_revision(revision: &str) -> Result<(), RepositoryError> {
    if revision.trim().is_empty() {
        return Err(RepositoryError::invalid_params(
            "revision",
            revision,
            "revision must not be empty",
        ));
    }
    if !is_path_safe(revision) || revision.contains("//") {
        return Err(RepositoryError::path_traversal("revision", revision));
    }
    Ok(())
}

/// Parses a size such as `"10MB"`, `"1.5 GB"`, `"512k"` or `"2048"`.
///
/// Units are binary multiples (`K` = 1024); the trailing `B` is optional.
///
/// # Errors
///
/// `InvalidParams` for anything else.
pub fn parse_size(raw: &str) -> Result<u64, RepositoryError> {
    let invalid = || {
        RepositoryError::new(
            ErrorCode::InvalidParams,
            format!("invalid size '{raw}', expected e.g. 500KB, 10MB or 2GB"),
        )
    };
    let text = raw.trim().to_ascii_uppercase();
    let text = text.strip_suffix('B').unwrap_or(&text);
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let multiplier: u64 = match unit.trim() {
        "" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        "T" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };
    if number.is_empty() {
        return Err(invalid());
    }
    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }
    let value: f64 = number.parse().map_err(|_| invalid())?;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let bytes = (value * multiplier as f64).floor() as u64;
    Ok(bytes)
}
