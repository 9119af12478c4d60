//! Test server harness for WebDAV integration tests.
//!
//! Provides a `TestServer` that runs a server over a temporary storage root,
//! along with HTTP convenience methods.

use bytes::Bytes;
use davlite::{Authenticator, CredentialStore, DavServer, ServerConfig};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default account created in a fresh credentials file.
pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "password";

const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Percent-encode a path for use in Destination headers.
fn url_encode_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len() * 3);
    for c in path.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '/') {
            result.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                result.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    result
}

/// Test server with HTTP client and automatic cleanup.
pub struct TestServer {
    server: DavServer,
    client: Client,
    /// Base URL for the server.
    pub base_url: String,
    /// Credentials attached to every request, if any.
    credentials: Option<(String, String)>,
    /// Directory holding the storage root (cleaned up on drop).
    temp_dir: TempDir,
}

impl TestServer {
    /// Start an unauthenticated server over a fresh temporary root.
    pub async fn with_temp_root() -> Self {
        Self::start(false, 256, DEFAULT_HEADER_TIMEOUT).await
    }

    /// Start a server that requires Basic credentials.
    ///
    /// The credentials file holds only the default account; the client
    /// sends no credentials until [`TestServer::login`] is called.
    pub async fn with_auth() -> Self {
        Self::start(true, 256, DEFAULT_HEADER_TIMEOUT).await
    }

    /// Start an unauthenticated server with a connection limit.
    pub async fn with_max_connections(max_connections: usize) -> Self {
        Self::start(false, max_connections, DEFAULT_HEADER_TIMEOUT).await
    }

    /// Start an unauthenticated server with a connection limit and a short
    /// deadline for clients to send a request head.
    pub async fn with_connection_limits(max_connections: usize, header_read_timeout: Duration) -> Self {
        Self::start(false, max_connections, header_read_timeout).await
    }

    async fn start(require_auth: bool, max_connections: usize, header_read_timeout: Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let authenticator: Option<Arc<dyn Authenticator>> = if require_auth {
            let store = CredentialStore::open(temp_dir.path().join("users.json"))
                .expect("Failed to open credential store");
            Some(Arc::new(store))
        } else {
            None
        };

        let config = ServerConfig {
            listen_address: "127.0.0.1:0".parse().unwrap(),
            storage_root: temp_dir.path().join("store"),
            require_auth,
            realm: "Test Server".to_string(),
            max_connections,
            header_read_timeout,
        };
        let server = DavServer::start(&config, authenticator)
            .await
            .expect("Failed to start WebDAV server");

        let base_url = server.url();
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        let test_server = Self {
            server,
            client,
            base_url,
            credentials: None,
            temp_dir,
        };
        test_server.wait_ready().await;
        test_server
    }

    /// Send these credentials with every following request.
    pub fn login(&mut self, username: &str, password: &str) {
        self.credentials = Some((username.to_string(), password.to_string()));
    }

    /// Wait for the server to accept connections.
    async fn wait_ready(&self) {
        for _ in 0..50 {
            if self
                .client
                .request(Method::OPTIONS, &self.base_url)
                .send()
                .await
                .is_ok()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("Server did not become ready in time");
    }

    /// Canonical storage root on disk.
    pub fn root(&self) -> &Path {
        self.server.storage_root()
    }

    /// Directory containing the storage root (outside the sandbox).
    pub fn outside(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Build a full URL from a path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build a URL-encoded URL for use in Destination headers.
    fn url_encoded(&self, path: &str) -> String {
        format!("{}{}", self.base_url, url_encode_path(path))
    }

    /// Start a request with any configured credentials attached.
    pub fn request(&self, method: &str, path: &str) -> RequestBuilder {
        let method = Method::from_bytes(method.as_bytes()).expect("invalid method");
        let builder = self.client.request(method, self.url(path));
        match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Response {
        builder
            .send()
            .await
            .unwrap_or_else(|e| panic!("{what} request failed: {e}"))
    }

    // ========== HTTP Convenience Methods ==========

    /// GET a resource.
    pub async fn get(&self, path: &str) -> Response {
        self.send(self.request("GET", path), "GET").await
    }

    /// GET a file's contents as bytes.
    pub async fn get_bytes(&self, path: &str) -> Result<Bytes, (StatusCode, String)> {
        let resp = self.get(path).await;
        let status = resp.status();
        if status.is_success() {
            Ok(resp.bytes().await.expect("Failed to read response bytes"))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err((status, body))
        }
    }

    /// HEAD a resource.
    pub async fn head(&self, path: &str) -> Response {
        self.send(self.request("HEAD", path), "HEAD").await
    }

    /// PUT file contents.
    pub async fn put(&self, path: &str, body: impl Into<reqwest::Body>) -> Response {
        self.send(self.request("PUT", path).body(body), "PUT").await
    }

    /// PUT file contents and assert success.
    pub async fn put_ok(&self, path: &str, body: impl Into<reqwest::Body>) {
        let resp = self.put(path, body).await;
        let status = resp.status();
        assert!(
            status == StatusCode::CREATED || status == StatusCode::NO_CONTENT,
            "PUT {path} failed with status {status}: {}",
            resp.text().await.unwrap_or_default()
        );
    }

    /// DELETE a file or directory.
    pub async fn delete(&self, path: &str) -> Response {
        self.send(self.request("DELETE", path), "DELETE").await
    }

    /// DELETE and assert success.
    pub async fn delete_ok(&self, path: &str) {
        let resp = self.delete(path).await;
        let status = resp.status();
        assert_eq!(status, StatusCode::NO_CONTENT, "DELETE {path} failed");
    }

    /// MKCOL (create directory).
    pub async fn mkcol(&self, path: &str) -> Response {
        self.send(self.request("MKCOL", path), "MKCOL").await
    }

    /// MKCOL and assert success.
    pub async fn mkcol_ok(&self, path: &str) {
        let resp = self.mkcol(path).await;
        assert_eq!(resp.status(), StatusCode::CREATED, "MKCOL {path} failed");
    }

    /// PROPFIND with an explicit Depth header.
    pub async fn propfind(&self, path: &str, depth: &str) -> Response {
        let builder = self.request("PROPFIND", path).header("Depth", depth);
        self.send(builder, "PROPFIND").await
    }

    /// PROPFIND and return body as string.
    pub async fn propfind_body(&self, path: &str, depth: &str) -> (StatusCode, String) {
        let resp = self.propfind(path, depth).await;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        (status, body)
    }

    /// COPY a file or directory.
    pub async fn copy(&self, from: &str, to: &str, overwrite: bool) -> Response {
        let builder = self
            .request("COPY", from)
            .header("Destination", self.url_encoded(to))
            .header("Overwrite", if overwrite { "T" } else { "F" });
        self.send(builder, "COPY").await
    }

    /// COPY and assert success.
    pub async fn copy_ok(&self, from: &str, to: &str) {
        let resp = self.copy(from, to, true).await;
        assert_eq!(resp.status(), StatusCode::CREATED, "COPY {from} -> {to} failed");
    }

    /// MOVE a file or directory.
    pub async fn move_(&self, from: &str, to: &str, overwrite: bool) -> Response {
        let builder = self
            .request("MOVE", from)
            .header("Destination", self.url_encoded(to))
            .header("Overwrite", if overwrite { "T" } else { "F" });
        self.send(builder, "MOVE").await
    }

    /// MOVE and assert success.
    pub async fn move_ok(&self, from: &str, to: &str) {
        let resp = self.move_(from, to, true).await;
        assert_eq!(resp.status(), StatusCode::CREATED, "MOVE {from} -> {to} failed");
    }

    /// Open a raw TCP connection to the server.
    pub async fn connect_raw(&self) -> TcpStream {
        TcpStream::connect(self.server.addr)
            .await
            .expect("Failed to connect")
    }

    /// Send a request with the path written to the wire exactly as given.
    ///
    /// HTTP clients normalize `..` segments (including `%2e%2e`) before
    /// sending, so traversal attempts need a hand-written request line.
    pub async fn raw_status(&self, method: &str, raw_path: &str) -> u16 {
        let mut stream = TcpStream::connect(self.server.addr)
            .await
            .expect("Failed to connect");
        let request = format!(
            "{method} {raw_path} HTTP/1.1\r\nHost: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            self.server.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        let status_line = response.lines().next().expect("empty response");
        status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("malformed status line: {status_line}"))
    }

    /// Stop the server explicitly (otherwise happens on drop).
    pub async fn stop(self) {
        self.server.stop().await;
    }
}

/// Shared test client for concurrent operations.
#[derive(Clone)]
pub struct SharedTestClient {
    client: Client,
    pub base_url: String,
}

impl SharedTestClient {
    /// Build a full URL from a path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a file's contents as bytes.
    pub async fn get_bytes(&self, path: &str) -> Result<Bytes, (StatusCode, String)> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp.bytes().await.expect("Failed to read response bytes"))
        } else {
            Err((status, resp.text().await.unwrap_or_default()))
        }
    }

    /// PUT file contents.
    pub async fn put(&self, path: &str, body: impl Into<reqwest::Body>) -> Result<StatusCode, String> {
        self.client
            .put(self.url(path))
            .body(body)
            .send()
            .await
            .map(|r| r.status())
            .map_err(|e| e.to_string())
    }

    /// PROPFIND (list directory or get properties).
    pub async fn propfind(&self, path: &str, depth: &str) -> Result<StatusCode, String> {
        self.client
            .request(Method::from_bytes(b"PROPFIND").unwrap(), self.url(path))
            .header("Depth", depth)
            .send()
            .await
            .map(|r| r.status())
            .map_err(|e| e.to_string())
    }
}

impl TestServer {
    /// Get a shared client for concurrent operations.
    pub fn shared_client(&self) -> SharedTestClient {
        SharedTestClient {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
        }
    }
}
