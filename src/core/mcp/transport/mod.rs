//! Message channels to MCP servers
//!
//! A [`Channel`] carries JSON-RPC messages for exactly one session. It is
//! opened by a [`Connector`] from a server descriptor and the credentials
//! for that server, and closed when the session ends.

pub mod http;
pub mod sse;
pub mod stdio;

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use super::auth::Credentials;
use super::config::{ServerDescriptor, TransportConfig, TransportKind};
use super::protocol::{IncomingMessage, OutgoingMessage};

/// Failure to open or use a channel
#[derive(Debug, Error)]
#[error("{kind} transport error for server '{server}': {message}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub server: String,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(kind: TransportKind, server: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            server: server.to_string(),
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Bidirectional JSON-RPC message channel
#[async_trait]
pub trait Channel: Send {
    fn kind(&self) -> TransportKind;

    /// Write one message
    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), TransportError>;

    /// Wait for the next message from the server
    async fn receive(&mut self) -> Result<IncomingMessage, TransportError>;

    /// Protocol revision agreed in the handshake
    fn set_protocol_version(&mut self, _version: &str) {}

    /// Release the connection. Best effort; the channel is unusable afterwards.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens channels for server descriptors
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        descriptor: &ServerDescriptor,
        credentials: &Credentials,
    ) -> Result<Box<dyn Channel>, TransportError>;
}

/// Connector for the built-in transports
#[derive(Debug, Clone)]
pub struct TransportConnector {
    http: reqwest::Client,
}

impl Default for TransportConnector {
    fn default() -> Self {
        Self {
            http: http_client(),
        }
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn open(
        &self,
        descriptor: &ServerDescriptor,
        credentials: &Credentials,
    ) -> Result<Box<dyn Channel>, TransportError> {
        let name = descriptor.name.as_str();
        match &descriptor.transport {
            TransportConfig::LocalProcess { .. } => {
                if !credentials.is_empty() {
                    tracing::debug!(server = %name, "local-process transport ignores credentials");
                }
                Ok(Box::new(stdio::StdioChannel::spawn(name, &descriptor.transport)?))
            }
            TransportConfig::Http { url, headers } => {
                let headers = request_headers(TransportKind::Http, name, headers, credentials)?;
                Ok(Box::new(http::HttpChannel::new(
                    name,
                    url.clone(),
                    self.http.clone(),
                    headers,
                )))
            }
            TransportConfig::Sse { url, headers } => {
                let headers = request_headers(TransportKind::Sse, name, headers, credentials)?;
                let channel =
                    sse::SseChannel::connect(name, url.clone(), self.http.clone(), headers).await?;
                Ok(Box::new(channel))
            }
        }
    }
}

/// Open a channel with the built-in transports
pub async fn open(
    descriptor: &ServerDescriptor,
    credentials: &Credentials,
) -> Result<Box<dyn Channel>, TransportError> {
    TransportConnector::default().open(descriptor, credentials).await
}

/// HTTP client shared by transports and the OAuth endpoints.
///
/// Idle connections are not pooled: sessions are short-lived and the blocking
/// facade runs each call on its own runtime.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap_or_default()
}

/// Descriptor headers plus credential headers; credentials win on conflict.
fn request_headers(
    kind: TransportKind,
    server: &str,
    configured: &BTreeMap<String, String>,
    credentials: &Credentials,
) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();

    for (name, value) in configured {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            TransportError::new(kind, server, format!("invalid header name '{name}'")).with_source(e)
        })?;
        let mut value = HeaderValue::from_str(value).map_err(|e| {
            TransportError::new(kind, server, format!("invalid value for header '{name}'"))
                .with_source(e)
        })?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }

    for (name, value) in credentials.headers() {
        headers.insert(name.clone(), value.clone());
    }

    Ok(headers)
}
