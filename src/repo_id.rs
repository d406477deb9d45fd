//! Repository identifiers and path-safety checks.
//!
//! All caller-supplied names (repository ids, sub-paths, remote file paths)
//! pass through here before they reach a URL or the filesystem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::RepositoryError;

static REPO_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+/[A-Za-z0-9._-]+$").ok());

/// Validated `owner/name` repository identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryId(String);

impl RepositoryId {
    /// Validates `raw` as an `owner/name` identifier.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::PathTraversal`] when the id contains `..` or `//`,
    /// [`crate::ErrorCode::InvalidParams`] when it is empty or not `owner/name`.
    pub fn parse(raw: &str) -> Result<Self, RepositoryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RepositoryError::invalid_params(
                "repo_id",
                raw,
                "repository id must not be empty",
            ));
        }
        if trimmed.contains("..") || trimmed.contains("//") || trimmed.starts_with('/') {
            return Err(RepositoryError::path_traversal("repo_id", trimmed));
        }
        let well_formed = REPO_ID_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(trimmed));
        if !well_formed {
            return Err(RepositoryError::invalid_params(
                "repo_id",
                trimmed,
                format!("invalid repository id '{trimmed}', expected owner/name"),
            )
            .with_suggestion("Use the owner/name form, e.g. openai/whisper-tiny"));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        self.0.split_once('/').map_or("", |(owner, _)| owner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, name)| name)
    }

    /// Single directory name for this repository: `owner--name`.
    #[must_use]
    pub fn folder_name(&self) -> String {
        self.0.replacen('/', "--", 1)
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns true when `path` is a plain relative path.
///
/// Rejects parent segments, absolute and home-relative paths, Windows drive
/// prefixes, backslashes, NUL and line breaks.
#[must_use]
pub fn is_path_safe(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('~') || path.contains('\\') {
        return false;
    }
    if path.chars().any(|c| matches!(c, '\0' | '\r' | '\n')) {
        return false;
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return false;
    }
    path.split('/').all(|segment| segment != "..")
}

/// Normalizes a caller-supplied sub-path (`""`, `"/"` and `"a/b/"` forms).
///
/// # Errors
///
/// [`crate::ErrorCode::PathTraversal`] for unsafe paths.
pub fn normalize_sub_path(field: &str, raw: &str) -> Result<String, RepositoryError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    if trimmed.is_empty() || trimmed == "." {
        return Ok(String::new());
    }
    if !is_path_safe(trimmed) || trimmed.contains("//") {
        return Err(RepositoryError::path_traversal(field, raw));
    }
    Ok(trimmed.to_string())
}

/// Joins a remote relative path under `root`, component by component.
///
/// # Errors
///
/// [`crate::ErrorCode::PathTraversal`] if `relative` could escape `root`.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, RepositoryError> {
    if relative.is_empty() || !is_path_safe(relative) {
        return Err(RepositoryError::path_traversal("path", relative));
    }
    let mut joined = root.to_path_buf();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            other => joined.push(other),
        }
    }
    if joined == root {
        return Err(RepositoryError::path_traversal("path", relative));
    }
    Ok(joined)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    // ==================== RepositoryId Tests ====================

    #[test]
    fn test_parse_valid_repo_id() {
        let id = RepositoryId::parse("openai/whisper-tiny").unwrap();
        assert_eq!(id.as_str(), "openai/whisper-tiny");
        assert_eq!(id.owner(), "openai");
        assert_eq!(id.name(), "whisper-tiny");
        assert_eq!(id.folder_name(), "openai--whisper-tiny");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let id = RepositoryId::parse("  owner/repo.v2 ").unwrap();
        assert_eq!(id.to_string(), "owner/repo.v2");
    }

    #[test]
    fn test_parse_rejects_traversal() {
        let error = RepositoryId::parse("../etc/passwd").unwrap_err();
        assert_eq!(error.code(), ErrorCode::PathTraversal);

        let error = RepositoryId::parse("owner//repo").unwrap_err();
        assert_eq!(error.code(), ErrorCode::PathTraversal);
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        let error = RepositoryId::parse("just-a-name").unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidParams);
        assert_eq!(error.details().unwrap().field.as_deref(), Some("repo_id"));
    }

    #[test]
    fn test_parse_rejects_extra_segments_and_empty() {
        assert_eq!(
            RepositoryId::parse("a/b/c").unwrap_err().code(),
            ErrorCode::InvalidParams
        );
        assert_eq!(
            RepositoryId::parse("").unwrap_err().code(),
            ErrorCode::InvalidParams
        );
        assert_eq!(
            RepositoryId::parse("owner/re po").unwrap_err().code(),
            ErrorCode::InvalidParams
        );
    }

    // ==================== Path Safety Tests ====================

    #[test]
    fn test_is_path_safe() {
        assert!(is_path_safe("config.json"));
        assert!(is_path_safe("onnx/model.onnx"));
        assert!(is_path_safe("weights..v2.bin"));
        assert!(!is_path_safe("../secret"));
        assert!(!is_path_safe("a/../../b"));
        assert!(!is_path_safe("/etc/passwd"));
        assert!(!is_path_safe("~/x"));
        assert!(!is_path_safe("C:evil"));
        assert!(!is_path_safe("a\\b"));
        assert!(!is_path_safe("a\nb"));
    }

    #[test]
    fn test_normalize_sub_path() {
        assert_eq!(normalize_sub_path("path", "").unwrap(), "");
        assert_eq!(normalize_sub_path("path", "/").unwrap(), "");
        assert_eq!(
            normalize_sub_path("path", "/onnx").unwrap_err().code(),
            ErrorCode::PathTraversal
        );
        assert_eq!(normalize_sub_path("path", "onnx/").unwrap(), "onnx");
        assert_eq!(normalize_sub_path("path", "./a/b").unwrap(), "a/b");
        assert_eq!(
            normalize_sub_path("path", "a/../..").unwrap_err().code(),
            ErrorCode::PathTraversal
        );
    }

    #[test]
    fn test_safe_join_stays_under_root() {
        let root = Path::new("/tmp/target");
        assert_eq!(
            safe_join(root, "onnx/model.onnx").unwrap(),
            PathBuf::from("/tmp/target/onnx/model.onnx")
        );
        assert_eq!(
            safe_join(root, "../escape").unwrap_err().code(),
            ErrorCode::PathTraversal
        );
        assert_eq!(
            safe_join(root, "/abs").unwrap_err().code(),
            ErrorCode::PathTraversal
        );
        assert!(safe_join(root, "").is_err());
    }
}
