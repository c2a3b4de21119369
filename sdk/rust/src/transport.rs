//! HTTP transport.
//!
//! The client talks to the server through the [`Transport`] trait: one POST
//! in, one status and body out. [`HyperTransport`] is the default, a plain
//! HTTP/1.1 client over a fresh TCP connection per request.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpRequest {
    /// A JSON POST to `url`.
    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut headers = HashMap::new();
        headers.insert(CONTENT_TYPE.as_str().to_string(), "application/json".to_string());
        Self {
            method: Method::POST,
            url: url.into(),
            headers,
            body: body.into(),
        }
    }

    /// Sets a header, replacing any previous value.
    pub fn header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A received response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Reason phrase as sent by the server, if the transport knows it.
    pub reason: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            reason: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `500 Internal Server Error`.
    pub fn status_text(&self) -> String {
        let reason = self.reason.as_deref().or_else(|| {
            StatusCode::from_u16(self.status)
                .ok()
                .and_then(|status| status.canonical_reason())
        });
        match reason {
            Some(reason) if !reason.is_empty() => format!("{} {}", self.status, reason),
            _ => self.status.to_string(),
        }
    }
}

/// Failure to complete the exchange.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("HTTPS is not supported by the built-in transport; use a proxy or a custom transport")]
    HttpsNotSupported,

    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error(transparent)]
    Http(#[from] hyper::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }
}

/// Sends one request and returns the whole response.
///
/// Implementations must not interpret the status code; the client does.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// HTTP/1.1 over `tokio` and `hyper`. Only `http://` URLs are supported.
#[derive(Debug, Clone, Default)]
pub struct HyperTransport {
    _private: (),
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let target = parse_url(&request.url)?;

        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(TransportError::Connect)?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(request.method)
            .uri(target.path.as_str())
            .header(HOST, target.authority());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        let outgoing = builder
            .body(Full::new(request.body))
            .map_err(TransportError::other)?;

        trace!(host = %target.host, port = target.port, path = %target.path, "sending request");
        let response = sender.send_request(outgoing).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    path: String,
}

impl Target {
    fn authority(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parses `http://host[:port][/path]` into its parts.
fn parse_url(url: &str) -> Result<Target, TransportError> {
    let url = url.trim();

    if url.starts_with("https://") {
        return Err(TransportError::HttpsNotSupported);
    }
    let without_scheme = url.strip_prefix("http://").unwrap_or(url);

    let (host_port, path) = match without_scheme.find('/') {
        Some(slash) => (&without_scheme[..slash], &without_scheme[slash..]),
        None => (without_scheme, "/"),
    };

    let (host, port) = match host_port.rfind(':') {
        Some(colon) => {
            let port = &host_port[colon + 1..];
            let port = port
                .parse()
                .map_err(|_| TransportError::InvalidUrl(format!("invalid port: {port}")))?;
            (&host_port[..colon], port)
        }
        None => (host_port, 80),
    };

    if host.is_empty() {
        return Err(TransportError::InvalidUrl(format!("missing host: {url}")));
    }

    Ok(Target {
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}
