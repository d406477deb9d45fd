//! URL construction for the remote tree and file endpoints.

use url::Url;

use crate::error::RepositoryError;
use crate::repo_id::RepositoryId;

/// Default listing API root.
pub const DEFAULT_API_BASE: &str = "https://huggingface.co/api/models";

/// Default file download root.
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://huggingface.co";

/// Validated base URLs for listing and downloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    api_base: String,
    download_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
        }
    }
}

impl Endpoints {
    /// Validates both bases as absolute http(s) URLs.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::InvalidParams`] for malformed bases.
    pub fn new(api_base: &str, download_base: &str) -> Result<Self, RepositoryError> {
        Ok(Self {
            api_base: validate_base("api_base", api_base)?,
            download_base: validate_base("download_base", download_base)?,
        })
    }

    /// Both bases derived from one hub root, e.g. `https://hf-mirror.com`.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorCode::InvalidParams`] for a malformed root.
    pub fn from_hub_root(root: &str) -> Result<Self, RepositoryError> {
        let root = validate_base("endpoint", root)?;
        Ok(Self {
            api_base: format!("{root}/api/models"),
            download_base: root,
        })
    }

    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    #[must_use]
    pub fn download_base(&self) -> &str {
        &self.download_base
    }

    /// `<api>/<repo>/tree/<revision>[/<path>]`
    #[must_use]
    pub fn tree_url(&self, repo: &RepositoryId, revision: &str, path: &str) -> String {
        let mut url = format!(
            "{}/{}/tree/{}",
            self.api_base,
            repo.as_str(),
            urlencoding::encode(revision)
        );
        if !path.is_empty() {
            url.push('/');
            url.push_str(&encode_path(path));
        }
        url
    }

    /// `<download>/<repo>/resolve/<revision>/<path>`
    #[must_use]
    pub fn resolve_url(&self, repo: &RepositoryId, revision: &str, path: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.download_base,
            repo.as_str(),
            urlencoding::encode(revision),
            encode_path(path)
        )
    }
}

fn validate_base(field: &str, raw: &str) -> Result<String, RepositoryError> {
    let trimmed = raw.trim().trim_end_matches('/');
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
            Ok(trimmed.to_string())
        }
        _ => Err(RepositoryError::invalid_params(
            field,
            raw,
            format!("{field} must be an absolute http(s) URL"),
        )),
    }
}

/// Percent-encodes each `/`-separated segment of a repository path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn repo() -> RepositoryId {
        RepositoryId::parse("owner/repo").unwrap()
    }

    #[test]
    fn test_tree_url_root_and_sub_path() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoints.tree_url(&repo(), "main", ""),
            "https://huggingface.co/api/models/owner/repo/tree/main"
        );
        assert_eq!(
            endpoints.tree_url(&repo(), "main", "onnx/fp16"),
            "https://huggingface.co/api/models/owner/repo/tree/main/onnx/fp16"
        );
    }

    #[test]
    fn test_resolve_url_encodes_segments() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoints.resolve_url(&repo(), "refs/pr/1", "dir/my file.bin"),
            "https://huggingface.co/owner/repo/resolve/refs%2Fpr%2F1/dir/my%20file.bin"
        );
    }

    #[test]
    fn test_custom_bases_trim_trailing_slash() {
        let endpoints = Endpoints::new("http://127.0.0.1:9000/api/models/", "http://127.0.0.1:9000/").unwrap();
        assert_eq!(endpoints.api_base(), "http://127.0.0.1:9000/api/models");
        assert_eq!(endpoints.download_base(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_from_hub_root() {
        let endpoints = Endpoints::from_hub_root("https://hf-mirror.com/").unwrap();
        assert_eq!(endpoints.api_base(), "https://hf-mirror.com/api/models");
        assert_eq!(endpoints.download_base(), "https://hf-mirror.com");
    }

    #[test]
    fn test_invalid_base_rejected() {
        let error = Endpoints::new("ftp://x", "https://ok").unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidParams);
        assert!(Endpoints::new("not a url", "https://ok").is_err());
    }
}
