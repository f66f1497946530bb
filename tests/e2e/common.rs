//! Common E2E Test Infrastructure
//!
//! Provides shared utilities for E2E tests:
//! - Test server management
//! - Fake backend replies
//! - Multipart request helpers

use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tgstate_relay::config::{Config, MetricsConfig, RelayConfig, ServerConfig, StoreConfig};
use tgstate_relay::server::Server;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Public base the relay resolves links against
pub const PUBLIC_BASE: &str = "https://host.example";

/// Secret the relay is configured with
pub const BACKEND_SECRET: &str = "e2e-secret";

/// E2E Test Environment
///
/// Owns the running server, the fake backend and the history directory.
pub struct E2ETestEnv {
    pub server_addr: SocketAddr,
    pub backend: MockServer,
    pub client: reqwest::Client,
    _store_dir: TempDir,
    _server_handle: tokio::task::JoinHandle<()>,
}

impl E2ETestEnv {
    /// Create a new E2E test environment with a running server
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_limit(ServerConfig::default().max_upload_bytes).await
    }

    /// Create an environment with a custom inbound body limit
    pub async fn with_limit(max_upload_bytes: u64) -> Result<Self, Box<dyn std::error::Error>> {
        Self::start(max_upload_bytes, None).await
    }

    /// Create an environment whose relay talks to `endpoint` instead of the fake backend
    pub async fn with_endpoint(endpoint: &str) -> Result<Self, Box<dyn std::error::Error>> {
        Self::start(ServerConfig::default().max_upload_bytes, Some(endpoint.to_string())).await
    }

    async fn start(
        max_upload_bytes: u64,
        endpoint: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let backend = MockServer::start().await;
        let store_dir = TempDir::new()?;
        let mut config = Self::config(&backend, &store_dir, max_upload_bytes);
        if endpoint.is_some() {
            config.relay.backend_endpoint = endpoint;
        }

        let server = Server::new(config).await?;
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        // Wait for server to be ready
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            server_addr,
            backend,
            client,
            _store_dir: store_dir,
            _server_handle: server_handle,
        })
    }

    fn config(backend: &MockServer, store_dir: &TempDir, max_upload_bytes: u64) -> Config {
        Config {
            server: ServerConfig {
                address: "127.0.0.1:0".into(),
                max_upload_bytes,
            },
            relay: RelayConfig {
                base_url: PUBLIC_BASE.into(),
                backend_endpoint: Some(format!("{}/api", backend.uri())),
                backend_secret: Some(BACKEND_SECRET.into()),
                timeout_secs: 5,
            },
            store: StoreConfig {
                path: store_dir.path().join("files.db"),
                max_connections: 2,
            },
            metrics: MetricsConfig::default(),
        }
    }

    /// Get the base URL for the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.server_addr)
    }

    /// Make the fake backend answer every upload with `body`
    pub async fn backend_replies(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body.to_string()))
            .mount(&self.backend)
            .await;
    }

    /// Upload a file via multipart POST
    pub async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        data: &'static [u8],
    ) -> Result<reqwest::Response, reqwest::Error> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        self.client
            .post(format!("{}/api/upload", self.base_url()))
            .multipart(form)
            .send()
            .await
    }

    /// GET a path on the relay
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await
    }
}

/// Generate test data of a given size
pub fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}
