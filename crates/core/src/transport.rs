//! Fetch mechanisms used by the strategy ladder.
//!
//! `HttpTransport` owns two reqwest clients and can also speak plain
//! HTTP/1.0 over a TCP socket when the client stack itself is the problem.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, header::CONTENT_TYPE};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::classifier::FailureObservation;

const USER_AGENT: &str = "tile-recovery/0.1";

/// Upper bound on a tile body read over the raw socket
const MAX_TILE_BYTES: u64 = 16 * 1024 * 1024;

/// How a single request is carried
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Shared pooled client
    Standard,
    /// Fresh HTTP/1.1-only client without connection reuse
    AlternateClient,
    /// Hand-written HTTP/1.0 request over a TCP socket
    RawSocket,
    /// HTTP/1.0 through reqwest with `Connection: close`
    MinimalProtocol,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Standard => write!(f, "standard"),
            TransportKind::AlternateClient => write!(f, "alternate-client"),
            TransportKind::RawSocket => write!(f, "raw-socket"),
            TransportKind::MinimalProtocol => write!(f, "minimal-protocol"),
        }
    }
}

/// A displayable tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePayload {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub transport: TransportKind,
}

/// Performs one fetch. Timeouts are applied by the caller.
#[async_trait]
pub trait TileTransport: Send + Sync {
    async fn fetch(&self, kind: TransportKind, url: &str) -> Result<TilePayload, FailureObservation>;
}

pub fn build_http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .gzip(true)
        .brotli(true)
        .http2_adaptive_window(true)
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(8)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default reqwest client");
            Client::new()
        })
}

fn build_alternate_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .http1_only()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default reqwest client");
            Client::new()
        })
}

/// Is this a body the map can display?
pub fn is_usable_image(content_type: Option<&str>, bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    if content_type.is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("image/")) {
        return true;
    }
    // Some servers mislabel tiles; trust the magic bytes
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF8")
        || (bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    alternate: Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(build_http_client())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            alternate: build_alternate_client(),
        }
    }

    async fn fetch_reqwest(
        &self,
        kind: TransportKind,
        url: &str,
    ) -> Result<TilePayload, FailureObservation> {
        let rb = match kind {
            TransportKind::AlternateClient => self
                .alternate
                .get(url)
                .header("Accept", "image/png,image/*;q=0.8"),
            TransportKind::MinimalProtocol => self
                .alternate
                .get(url)
                .version(reqwest::Version::HTTP_10)
                .header("Connection", "close"),
            _ => self.client.get(url),
        };

        let resp = rb.send().await.map_err(|e| FailureObservation::from_reqwest(&e))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(FailureObservation::http_status(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FailureObservation::from_reqwest(&e))?;

        into_payload(url, kind, status.as_u16(), content_type, bytes.to_vec())
    }

    async fn fetch_raw(&self, url: &str) -> Result<TilePayload, FailureObservation> {
        let parsed = Url::parse(url).map_err(|_| FailureObservation::default())?;
        if parsed.scheme() != "http" {
            // No TLS on the bare socket
            tracing::debug!(url, "raw socket transport skipped for non-http url");
            return Err(FailureObservation::transport());
        }
        let host = parsed.host_str().ok_or_else(FailureObservation::default)?;
        let port = parsed.port_or_known_default().unwrap_or(80);

        let mut target = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|_| FailureObservation::transport())?;
        let request = format!(
            "GET {target} HTTP/1.0\r\nHost: {host}:{port}\r\nUser-Agent: {USER_AGENT}\r\nAccept: image/*\r\nConnection: close\r\n\r\n"
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|_| FailureObservation::transport())?;

        let mut raw = Vec::new();
        stream
            .take(MAX_TILE_BYTES)
            .read_to_end(&mut raw)
            .await
            .map_err(|_| FailureObservation::transport())?;

        let (status, content_type, body) =
            parse_raw_response(&raw).ok_or_else(FailureObservation::transport)?;
        if status != 200 {
            return Err(FailureObservation::http_status(status));
        }
        into_payload(url, TransportKind::RawSocket, status, content_type, body.to_vec())
    }
}

#[async_trait]
impl TileTransport for HttpTransport {
    async fn fetch(&self, kind: TransportKind, url: &str) -> Result<TilePayload, FailureObservation> {
        match kind {
            TransportKind::RawSocket => self.fetch_raw(url).await,
            _ => self.fetch_reqwest(kind, url).await,
        }
    }
}

fn into_payload(
    url: &str,
    transport: TransportKind,
    status: u16,
    content_type: Option<String>,
    bytes: Vec<u8>,
) -> Result<TilePayload, FailureObservation> {
    if !is_usable_image(content_type.as_deref(), &bytes) {
        // Typically an XML service exception delivered with 200
        return Err(FailureObservation::http_status(status));
    }
    Ok(TilePayload {
        url: url.to_string(),
        content_type,
        bytes,
        transport,
    })
}

/// Split an HTTP/1.x response into status, content type and body
fn parse_raw_response(raw: &[u8]) -> Option<(u16, Option<String>, &[u8])> {
    let split = raw.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = std::str::from_utf8(&raw[..split]).ok()?;
    let body = &raw[split + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next()?;
    let mut parts = status_line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let status: u16 = parts.next()?.parse().ok()?;

    let content_type = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-type")
            .then(|| value.trim().to_string())
    });
    Some((status, content_type, body))
}
