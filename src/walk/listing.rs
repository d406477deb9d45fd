//! Directory listings, served from the result cache when possible.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderValue, IF_NONE_MATCH};
use serde::Serialize;
use tracing::{debug, instrument};

use super::entry::{TreeEntry, parse_listing};
use crate::cache::{ResultCache, cache_key};
use crate::endpoints::Endpoints;
use crate::error::{ErrorCode, RepositoryError};
use crate::http::{HttpClient, RawFailure, RequestOptions, classify};
use crate::repo_id::RepositoryId;

/// Default lifetime of a cached listing (60 seconds).
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(60);

/// Cache type holding parsed listings.
pub type ListingCache = ResultCache<Vec<TreeEntry>>;

#[derive(Serialize)]
struct ListingKey<'a> {
    kind: &'static str,
    repo: &'a str,
    revision: &'a str,
    path: &'a str,
}

/// Fetches one directory level at a time, consulting the cache first.
#[derive(Debug, Clone)]
pub struct ListingSource {
    http: Arc<HttpClient>,
    cache: Arc<ListingCache>,
    endpoints: Endpoints,
    ttl: Duration,
}

impl ListingSource {
    #[must_use]
    pub fn new(
        http: Arc<HttpClient>,
        cache: Arc<ListingCache>,
        endpoints: Endpoints,
        ttl: Duration,
    ) -> Self {
        Self {
            http,
            cache,
            endpoints,
            ttl,
        }
    }

    /// Cache key for one listing.
    #[must_use]
    pub fn key(repo: &RepositoryId, revision: &str, path: &str) -> String {
        cache_key(&ListingKey {
            kind: "tree",
            repo: repo.as_str(),
            revision,
            path,
        })
    }

    /// Lists `path` in `repo@revision`.
    ///
    /// A stale cached listing with a known ETag is revalidated with
    /// `If-None-Match`; a `304` refreshes it without a new body.
    ///
    /// # Errors
    ///
    /// The classified HTTP failure, or `NetworkError` for an undecodable body.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn fetch(
        &self,
        repo: &RepositoryId,
        revision: &str,
        path: &str,
    ) -> Result<Vec<TreeEntry>, RepositoryError> {
        let key = Self::key(repo, revision, path);
        if let Some(entries) = self.cache.get(&key) {
            debug!(path, entries = entries.len(), "listing cache hit");
            return Ok(entries);
        }

        let url = self.endpoints.tree_url(repo, revision, path);
        let mut options = RequestOptions::default();
        if let Some(etag) = self.cache.etag(&key) {
            if let Ok(value) = HeaderValue::from_str(&etag) {
                options.headers.insert(IF_NONE_MATCH, value);
            }
        }

        let mut response = self.http.get(&url, &options).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some(entries) = self.cache.revalidate(&key, Some(self.ttl)) {
                debug!(path, "listing revalidated with 304");
                return Ok(entries);
            }
            // Entry was evicted while the request was in flight.
            response = self.http.get(&url, &RequestOptions::default()).await?;
            if response.status() == StatusCode::NOT_MODIFIED {
                return Err(RepositoryError::new(
                    ErrorCode::NetworkError,
                    format!("unexpected 304 for unconditional request to {url}"),
                ));
            }
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify(&RawFailure::from_reqwest(&url, &e)))?;
        let entries = parse_listing(body);
        debug!(path, entries = entries.len(), "listing fetched");

        if self.cache.set(&key, entries.clone(), Some(self.ttl)) {
            if let Some(etag) = etag {
                self.cache.set_etag(&key, etag);
            }
        }
        Ok(entries)
    }

    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    #[must_use]
    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cache::CacheConfig;
    use crate::http::{HttpClientConfig, RetryPolicy};

    fn source(server: &MockServer, ttl: Duration) -> (ListingSource, Arc<ListingCache>) {
        let http = HttpClient::new(HttpClientConfig {
            retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            ..HttpClientConfig::default()
        })
        .unwrap();
        let cache = Arc::new(ListingCache::new(CacheConfig::default()));
        let endpoints =
            Endpoints::new(&format!("{}/api/models", server.uri()), &server.uri()).unwrap();
        (
            ListingSource::new(Arc::new(http), Arc::clone(&cache), endpoints, ttl),
            cache,
        )
    }

    fn repo() -> RepositoryId {
        RepositoryId::parse("owner/repo").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_caches_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models/owner/repo/tree/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"type": "file", "path": "a.txt", "size": 1}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let (source, cache) = source(&server, DEFAULT_LISTING_TTL);
        let first = source.fetch(&repo(), "main", "").await.unwrap();
        let second = source.fetch(&repo(), "main", "").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_fetch_sub_path_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models/owner/repo/tree/v1/onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let (source, _) = source(&server, DEFAULT_LISTING_TTL);
        assert!(source.fetch(&repo(), "v1", "onnx").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_revalidates_with_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models/owner/repo/tree/main"))
            .and(header("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/models/owner/repo/tree/main"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v1\"")
                    .set_body_json(json!([{"type": "file", "path": "a.txt"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        // Zero TTL: every lookup after the first goes back to the server.
        let (source, cache) = source(&server, Duration::ZERO);
        let first = source.fetch(&repo(), "main", "").await.unwrap();
        let second = source.fetch(&repo(), "main", "").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
        assert_eq!(cache.etag(&ListingSource::key(&repo(), "main", "")).as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (source, _) = source(&server, DEFAULT_LISTING_TTL);
        let error = source.fetch(&repo(), "main", "").await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_fetch_invalid_json_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let (source, _) = source(&server, DEFAULT_LISTING_TTL);
        let error = source.fetch(&repo(), "main", "").await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::NetworkError);
    }
}
