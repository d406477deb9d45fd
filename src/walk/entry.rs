//! Tree entries parsed from remote listing responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::repo_id::is_path_safe;

/// A file record from a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Repository-relative POSIX path.
    pub path: String,
    /// Size in bytes when the listing reports it.
    pub size: Option<u64>,
    /// Content hash.
    pub oid: Option<String>,
    /// Stored through the large-file pointer mechanism.
    pub lfs: bool,
}

impl FileEntry {
    /// Final path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lowercased extension with leading dot, or `no-extension`.
    #[must_use]
    pub fn extension(&self) -> String {
        extension_of(&self.path)
    }

    /// Number of directory components in the path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }
}

/// Lowercased extension of the last path segment, with leading dot.
#[must_use]
pub fn extension_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => "no-extension".to_string(),
    }
}

/// One record of a remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeEntry {
    File(FileEntry),
    Directory { path: String },
}

impl TreeEntry {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::File(file) => &file.path,
            Self::Directory { path } => path,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    lfs: Option<Value>,
}

/// Parses a listing body.
///
/// A non-array body is an empty listing. Unknown entry types, malformed
/// records and unsafe paths are skipped.
#[must_use]
pub fn parse_listing(body: Value) -> Vec<TreeEntry> {
    let Value::Array(items) = body else {
        debug!("listing body is not an array, treating as empty");
        return Vec::new();
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let raw: RawTreeEntry = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "skipping malformed listing record");
                continue;
            }
        };
        let path = raw.path.trim_matches('/').to_string();
        if path.is_empty() || !is_path_safe(&path) {
            warn!(path = %raw.path, "skipping listing record with unsafe path");
            continue;
        }
        match raw.kind.as_str() {
            "file" => entries.push(TreeEntry::File(FileEntry {
                path,
                size: raw.size,
                oid: raw.oid,
                lfs: raw.lfs.as_ref().is_some_and(lfs_flag),
            })),
            "directory" => entries.push(TreeEntry::Directory { path }),
            other => debug!(kind = other, path = %path, "skipping unknown entry type"),
        }
    }
    entries
}

/// The listing reports `lfs` as a pointer object, sometimes as a bare bool.
fn lfs_flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Object(_) => true,
        _ => false,
    }
}
