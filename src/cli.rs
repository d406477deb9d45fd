//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use repofetch_core::walk::FileCategory;
use repofetch_core::{DownloadOptions, ExploreOptions, ListOptions, SortBy, parse_size};
use repofetch_core::engine::{DEFAULT_EXPLORE_MAX_FILES, DEFAULT_REVISION};
use repofetch_core::walk::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_FILES};

use crate::app_config::FileConfig;

/// List, explore and download files from hosted model repositories.
///
/// Results are printed to stdout as JSON; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "repofetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Access token (overrides HF_TOKEN / HUGGINGFACE_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Hub root serving the listing and file APIs (overrides HF_ENDPOINT)
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List files in a repository
    List(ListArgs),
    /// Show the directory structure of a repository
    Explore(ExploreArgs),
    /// Download files from a repository
    Download(DownloadArgs),
}

impl Command {
    #[must_use]
    pub fn repo_id(&self) -> &str {
        match self {
            Self::List(args) => &args.selection.repo_id,
            Self::Explore(args) => &args.repo_id,
            Self::Download(args) => &args.selection.repo_id,
        }
    }
}

/// File selection shared by `list` and `download`.
#[derive(ClapArgs, Debug)]
pub struct SelectionArgs {
    /// Repository id, e.g. `openai/whisper-tiny`
    pub repo_id: String,

    /// Branch, tag or commit
    #[arg(long)]
    pub revision: Option<String>,

    /// Sub-directory to start from
    #[arg(long, default_value = "")]
    pub path: String,

    /// Glob of files to include (repeatable)
    #[arg(short = 'i', long = "include", visible_alias = "pattern", value_name = "GLOB")]
    pub include: Vec<String>,

    /// Glob of files to exclude (repeatable)
    #[arg(short = 'e', long = "exclude", value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Maximum number of files to return
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_files: Option<u64>,

    /// Maximum directory depth below the starting path
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=20))]
    pub max_depth: Option<u64>,

    /// Skip files smaller than this (e.g. 10MB)
    #[arg(long, value_parser = parse_size_arg, value_name = "SIZE")]
    pub min_size: Option<u64>,

    /// Skip files larger than this (e.g. 2GB)
    #[arg(long, value_parser = parse_size_arg, value_name = "SIZE")]
    pub max_size: Option<u64>,

    /// Restrict to file categories (models, configs, docs, code, data, media, archives, other)
    #[arg(long = "type", value_parser = parse_category_arg, value_name = "CATEGORY")]
    pub categories: Vec<FileCategory>,

    /// Only look at the starting directory
    #[arg(long)]
    pub no_recursive: bool,
}

impl SelectionArgs {
    /// Selection as list options, falling back to config-file defaults.
    #[must_use]
    pub fn to_list_options(&self, defaults: &FileConfig) -> ListOptions {
        ListOptions::default()
            .with_revision(resolve_revision(self.revision.as_deref(), defaults))
            .with_path(self.path.clone())
            .with_recursive(!self.no_recursive)
            .with_max_files(
                to_usize(self.max_files)
                    .or(defaults.max_files)
                    .unwrap_or(DEFAULT_MAX_FILES),
            )
            .with_max_depth(
                to_usize(self.max_depth)
                    .or(defaults.max_depth)
                    .unwrap_or(DEFAULT_MAX_DEPTH),
            )
            .with_include(self.include.iter().cloned())
            .with_exclude(self.exclude.iter().cloned())
            .with_size_range(self.min_size, self.max_size)
            .with_categories(self.categories.iter().copied())
    }
}

#[derive(ClapArgs, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Result ordering: name, size or type
    #[arg(long, value_parser = parse_sort_arg, default_value = "name")]
    pub sort: SortBy,

    /// Search file paths for a substring or glob
    #[arg(long, value_name = "QUERY")]
    pub search: Option<String>,
}

impl ListArgs {
    #[must_use]
    pub fn to_options(&self, defaults: &FileConfig) -> ListOptions {
        let options = self.selection.to_list_options(defaults).with_sort(self.sort);
        match &self.search {
            Some(query) => options.with_query(query.clone()),
            None => options,
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct ExploreArgs {
    /// Repository id, e.g. `openai/whisper-tiny`
    pub repo_id: String,

    /// Branch, tag or commit
    #[arg(long)]
    pub revision: Option<String>,

    /// Sub-directory to start from
    #[arg(long, default_value = "")]
    pub path: String,

    /// Maximum directory depth below the starting path
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=20))]
    pub max_depth: Option<u64>,

    /// Stop scanning after this many files
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_files: Option<u64>,

    /// Include an ASCII tree rendering
    #[arg(long)]
    pub tree: bool,
}

impl ExploreArgs {
    #[must_use]
    pub fn to_options(&self, defaults: &FileConfig) -> ExploreOptions {
        ExploreOptions::default()
            .with_revision(resolve_revision(self.revision.as_deref(), defaults))
            .with_path(self.path.clone())
            .with_max_depth(
                to_usize(self.max_depth)
                    .or(defaults.max_depth)
                    .unwrap_or(DEFAULT_MAX_DEPTH),
            )
            .with_max_files(to_usize(self.max_files).unwrap_or(DEFAULT_EXPLORE_MAX_FILES))
            .with_tree_view(self.tree)
    }
}

#[derive(ClapArgs, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Directory to write into (default: <download root>/<owner>--<name>)
    pub target_dir: Option<PathBuf>,

    /// Download only this repository path (repeatable)
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub files: Vec<String>,

    /// Re-download files that already exist
    #[arg(long)]
    pub force: bool,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum retry attempts per file for transient failures (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl DownloadArgs {
    /// Download options without the cancel flag and progress channel.
    #[must_use]
    pub fn to_options(&self, defaults: &FileConfig) -> DownloadOptions {
        let mut options = DownloadOptions::default()
            .with_list(self.selection.to_list_options(defaults))
            .with_files(self.files.iter().cloned())
            .with_force(self.force);
        if let Some(concurrency) = self.concurrency {
            options = options.with_concurrency(usize::from(concurrency));
        }
        if let Some(max_retries) = self.max_retries {
            options = options.with_max_retries(u32::from(max_retries));
        }
        options
    }
}

fn resolve_revision(cli: Option<&str>, defaults: &FileConfig) -> String {
    cli.map(str::to_string)
        .or_else(|| defaults.revision.clone())
        .unwrap_or_else(|| DEFAULT_REVISION.to_string())
}

fn to_usize(value: Option<u64>) -> Option<usize> {
    value.map(|v| usize::try_from(v).unwrap_or(usize::MAX))
}

fn parse_size_arg(raw: &str) -> Result<u64, String> {
    parse_size(raw).map_err(|e| e.message().to_string())
}

fn parse_category_arg(raw: &str) -> Result<FileCategory, String> {
    raw.parse::<FileCategory>().map_err(|e| e.message().to_string())
}

fn parse_sort_arg(raw: &str) -> Result<SortBy, String> {
    raw.parse::<SortBy>().map_err(|e| e.message().to_string())
}
