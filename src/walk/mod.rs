//! Remote tree traversal: listings, filtering and the bounded walker.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use repofetch_core::cache::CacheConfig;
//! use repofetch_core::endpoints::Endpoints;
//! use repofetch_core::http::{HttpClient, HttpClientConfig};
//! use repofetch_core::repo_id::RepositoryId;
//! use repofetch_core::walk::{
//!     DEFAULT_LISTING_TTL, DirectoryWalker, FileFilter, ListingCache, ListingSource, WalkBudget,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let http = Arc::new(HttpClient::new(HttpClientConfig::default())?);
//! let cache = Arc::new(ListingCache::new(CacheConfig::default()));
//! let source = ListingSource::new(http, cache, Endpoints::default(), DEFAULT_LISTING_TTL);
//! let repo = RepositoryId::parse("gpt2/gpt2")?;
//! let filter = FileFilter::new().include(&["*.json"])?;
//!
//! let mut walker = DirectoryWalker::new(source, repo, "main", "", filter, WalkBudget::default());
//! while let Some(file) = walker.next().await {
//!     println!("{}", file?.path);
//! }
//! # Ok(())
//! # }
//! ```

mod entry;
mod filter;
mod listing;
mod walker;

pub use entry::{FileEntry, TreeEntry, extension_of, parse_listing};
pub use filter::{FileCategory, FileFilter, GlobPattern, matches};
pub use listing::{DEFAULT_LISTING_TTL, ListingCache, ListingSource};
pub use walker::{
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_FILES, DirectoryWalker, ROOT_MARKER, WalkBudget, WalkReport,
};
