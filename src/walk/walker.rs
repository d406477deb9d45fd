//! Lazy, budget-bounded depth-first traversal of a remote tree.
//!
//! The walker drives an explicit stack of `(path, depth)` frames. Each call
//! to [`DirectoryWalker::next`] yields at most one file and fetches at most
//! one listing, so a consumer that stops pulling leaves no work in flight.

use std::collections::VecDeque;

use futures_util::Stream;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::entry::{FileEntry, TreeEntry};
use super::filter::FileFilter;
use super::listing::ListingSource;
use crate::error::RepositoryError;
use crate::repo_id::RepositoryId;

/// Default recursion ceiling.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Default ceiling on yielded files.
pub const DEFAULT_MAX_FILES: usize = 100;

/// Path recorded for the walk root in truncation and skip lists.
pub const ROOT_MARKER: &str = ".";

/// Depth and count limits plus the counters of one walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkBudget {
    max_depth: usize,
    max_files: usize,
    files_yielded: usize,
    truncated_paths: Vec<String>,
}

impl Default for WalkBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, DEFAULT_MAX_FILES)
    }
}

impl WalkBudget {
    #[must_use]
    pub fn new(max_depth: usize, max_files: usize) -> Self {
        Self {
            max_depth,
            max_files,
            files_yielded: 0,
            truncated_paths: Vec::new(),
        }
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[must_use]
    pub fn max_files(&self) -> usize {
        self.max_files
    }

    #[must_use]
    pub fn files_yielded(&self) -> usize {
        self.files_yielded
    }

    #[must_use]
    pub fn truncated_paths(&self) -> &[String] {
        &self.truncated_paths
    }

    fn files_exhausted(&self) -> bool {
        self.files_yielded >= self.max_files
    }

    fn may_descend_from(&self, depth: usize) -> bool {
        depth < self.max_depth && !self.files_exhausted()
    }

    fn truncate(&mut self, path: &str) {
        let path = display_path(path);
        if !self.truncated_paths.iter().any(|p| p == &path) {
            self.truncated_paths.push(path);
        }
    }
}

/// Outcome of a finished or abandoned walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkReport {
    pub files_yielded: usize,
    pub directories_visited: usize,
    /// Every directory path seen in a listing, in discovery order.
    pub directories: Vec<String>,
    /// Directories not expanded because a budget was hit.
    pub truncated_paths: Vec<String>,
    /// Directories whose listing failed and were treated as empty.
    pub skipped_paths: Vec<String>,
}

impl WalkReport {
    #[must_use]
    pub fn truncated(&self) -> bool {
        !self.truncated_paths.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Frame {
    path: String,
    depth: usize,
}

/// Depth-first walker over one repository revision.
#[derive(Debug)]
pub struct DirectoryWalker {
    source: ListingSource,
    repo: RepositoryId,
    revision: String,
    root: String,
    filter: FileFilter,
    budget: WalkBudget,
    stack: Vec<Frame>,
    pending: VecDeque<FileEntry>,
    pending_dir: String,
    directories: Vec<String>,
    directories_visited: usize,
    skipped_paths: Vec<String>,
    finished: bool,
}

impl DirectoryWalker {
    /// Prepares a walk rooted at `root` (`""` for the repository root).
    /// Nothing is fetched until the first [`next`](Self::next).
    #[must_use]
    pub fn new(
        source: ListingSource,
        repo: RepositoryId,
        revision: impl Into<String>,
        root: impl Into<String>,
        filter: FileFilter,
        budget: WalkBudget,
    ) -> Self {
        let root = root.into();
        Self {
            source,
            repo,
            revision: revision.into(),
            stack: vec![Frame {
                path: root.clone(),
                depth: 0,
            }],
            root,
            filter,
            budget,
            pending: VecDeque::new(),
            pending_dir: String::new(),
            directories: Vec::new(),
            directories_visited: 0,
            skipped_paths: Vec::new(),
            finished: false,
        }
    }

    #[must_use]
    pub fn budget(&self) -> &WalkBudget {
        &self.budget
    }

    /// Yields the next matching file.
    ///
    /// Returns `None` when the tree is exhausted or the file budget is spent.
    /// A failure listing the root is returned once and ends the walk; a
    /// failure listing a subdirectory is logged and that subtree skipped.
    #[allow(clippy::should_implement_trait)]
    #[instrument(level = "debug", skip(self), fields(repo = %self.repo, revision = %self.revision))]
    pub async fn next(&mut self) -> Option<Result<FileEntry, RepositoryError>> {
        loop {
            if self.finished {
                return None;
            }
            if self.budget.files_exhausted() {
                self.abandon_remaining();
                self.finished = true;
                return None;
            }
            if let Some(file) = self.pending.pop_front() {
                self.budget.files_yielded += 1;
                return Some(Ok(file));
            }
            let Some(frame) = self.stack.pop() else {
                self.finished = true;
                return None;
            };

            match self.source.fetch(&self.repo, &self.revision, &frame.path).await {
                Ok(entries) => self.expand(&frame, entries),
                Err(error) if frame.path == self.root && frame.depth == 0 => {
                    self.finished = true;
                    return Some(Err(error));
                }
                Err(error) => {
                    warn!(
                        path = %frame.path,
                        code = %error.code(),
                        error = %error,
                        "directory listing failed, skipping subtree"
                    );
                    self.skipped_paths.push(display_path(&frame.path));
                }
            }
        }
    }

    fn expand(&mut self, frame: &Frame, entries: Vec<TreeEntry>) {
        self.directories_visited += 1;
        self.pending_dir.clone_from(&frame.path);
        let mut subdirectories = Vec::new();

        for entry in entries {
            match entry {
                TreeEntry::File(file) => {
                    if self.filter.matches(&file) {
                        self.pending.push_back(file);
                    }
                }
                TreeEntry::Directory { path } => {
                    self.directories.push(path.clone());
                    subdirectories.push(path);
                }
            }
        }

        debug!(
            path = %frame.path,
            depth = frame.depth,
            files = self.pending.len(),
            subdirectories = subdirectories.len(),
            "expanded directory"
        );

        if self.budget.may_descend_from(frame.depth) {
            // Reverse so the first listed subdirectory is walked first.
            for path in subdirectories.into_iter().rev() {
                self.stack.push(Frame {
                    path,
                    depth: frame.depth + 1,
                });
            }
        } else {
            for path in &subdirectories {
                self.budget.truncate(path);
            }
        }
    }

    fn abandon_remaining(&mut self) {
        if !self.pending.is_empty() {
            let dir = self.pending_dir.clone();
            self.budget.truncate(&dir);
            self.pending.clear();
        }
        for frame in std::mem::take(&mut self.stack) {
            self.budget.truncate(&frame.path);
        }
    }

    /// Pull-based stream view over [`next`](Self::next).
    pub fn stream(&mut self) -> impl Stream<Item = Result<FileEntry, RepositoryError>> + '_ {
        futures_util::stream::unfold(self, |walker| async move {
            let item = walker.next().await?;
            Some((item, walker))
        })
    }

    /// Drains the walk, collecting every file, and returns the report.
    ///
    /// # Errors
    ///
    /// Fails only when the root listing fails.
    pub async fn collect(mut self) -> Result<(Vec<FileEntry>, WalkReport), RepositoryError> {
        let mut files = Vec::new();
        while let Some(item) = self.next().await {
            files.push(item?);
        }
        Ok((files, self.finish()))
    }

    /// Ends the walk. Work not yet done is reported as truncated.
    #[must_use]
    pub fn finish(mut self) -> WalkReport {
        if !self.finished {
            self.abandon_remaining();
        }
        WalkReport {
            files_yielded: self.budget.files_yielded,
            directories_visited: self.directories_visited,
            directories: self.directories,
            truncated_paths: self.budget.truncated_paths,
            skipped_paths: self.skipped_paths,
        }
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        ROOT_MARKER.to_string()
    } else {
        path.to_string()
    }
}
