//! A wiremock stand-in for the tree listing and file resolve endpoints.

use std::time::Duration;

use repofetch_core::download::SchedulerConfig;
use repofetch_core::{EngineConfig, Endpoints, FetchEngine, HttpClientConfig, RetryPolicy};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use super::socket_guard::start_mock_server_or_skip;

pub const REPO: &str = "owner/repo";

pub struct MockHub {
    pub server: MockServer,
}

impl MockHub {
    pub async fn start() -> Option<Self> {
        start_mock_server_or_skip()
            .await
            .map(|server| Self { server })
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Engine config pointed at this hub, with millisecond backoffs.
    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            endpoints: Endpoints::from_hub_root(&self.server.uri()).unwrap(),
            http: HttpClientConfig {
                retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
                ..HttpClientConfig::default()
            },
            download: SchedulerConfig {
                retry_base_delay: Duration::from_millis(1),
                retry_max_delay: Duration::from_millis(5),
                ..SchedulerConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    pub fn engine(&self) -> FetchEngine {
        FetchEngine::new(self.config()).unwrap()
    }

    pub fn tree_path(dir: &str) -> String {
        if dir.is_empty() {
            format!("/api/models/{REPO}/tree/main")
        } else {
            format!("/api/models/{REPO}/tree/main/{dir}")
        }
    }

    pub fn resolve_path(file: &str) -> String {
        format!("/{REPO}/resolve/main/{file}")
    }

    /// Serves `entries` as the listing of `dir` on `main`.
    pub async fn tree(&self, dir: &str, entries: Value) {
        Mock::given(method("GET"))
            .and(path(Self::tree_path(dir)))
            .respond_with(ResponseTemplate::new(200).set_body_json(entries))
            .mount(&self.server)
            .await;
    }

    /// Serves `dir` with `status` and no body.
    pub async fn tree_status(&self, dir: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(Self::tree_path(dir)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serves `body` for `file`, expecting exactly `expected` requests.
    pub async fn file(&self, file: &str, body: &[u8], expected: u64) {
        Mock::given(method("GET"))
            .and(path(Self::resolve_path(file)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    pub async fn file_with<R: Respond + 'static>(&self, file: &str, responder: R) {
        Mock::given(method("GET"))
            .and(path(Self::resolve_path(file)))
            .respond_with(responder)
            .mount(&self.server)
            .await;
    }

    pub async fn file_status(&self, file: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(Self::resolve_path(file)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }
}

pub fn file(path: &str, size: u64) -> Value {
    json!({"type": "file", "path": path, "size": size, "oid": format!("oid-{path}")})
}

pub fn lfs_file(path: &str, size: u64) -> Value {
    json!({
        "type": "file",
        "path": path,
        "size": size,
        "lfs": {"oid": format!("sha256:{path}"), "size": size, "pointerSize": 134}
    })
}

pub fn dir(path: &str) -> Value {
    json!({"type": "directory", "path": path, "oid": format!("oid-{path}")})
}
