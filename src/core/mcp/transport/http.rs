//! Streamable HTTP transport
//!
//! Every client message is a `POST` to the server URL. Replies come back
//! either as a JSON body (single message or batch) or as an SSE body that is
//! read lazily by [`Channel::receive`]. The `Mcp-Session-Id` assigned by the
//! server is echoed on every later request and released with `DELETE` on close.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use url::Url;

use super::sse::{SseEvent, decode_message, event_stream};
use super::{Channel, TransportError};
use crate::core::mcp::config::TransportKind;
use crate::core::mcp::protocol::{IncomingMessage, OutgoingMessage};
use crate::core::secret;

pub const SESSION_ID_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Streamable HTTP channel
pub struct HttpChannel {
    server: String,
    url: Url,
    http: reqwest::Client,
    headers: HeaderMap,
    session_id: Option<HeaderValue>,
    queue: VecDeque<IncomingMessage>,
    stream: Option<BoxStream<'static, Result<SseEvent, reqwest::Error>>>,
}

impl HttpChannel {
    #[must_use]
    pub fn new(server: &str, url: Url, http: reqwest::Client, headers: HeaderMap) -> Self {
        Self {
            server: server.to_string(),
            url,
            http,
            headers,
            session_id: None,
            queue: VecDeque::new(),
            stream: None,
        }
    }

    /// Session id assigned by the server, if any
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_ref().and_then(|v| v.to_str().ok())
    }

    fn error(&self, message: impl Into<String>) -> TransportError {
        TransportError::new(TransportKind::Http, &self.server, message)
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(id) = &self.session_id {
            headers.insert(SESSION_ID_HEADER, id.clone());
        }
        headers
    }

    async fn read_json_body(&mut self, response: reqwest::Response) -> Result<(), TransportError> {
        let body = response
            .bytes()
            .await
            .map_err(|e| self.error("failed to read response body").with_source(e))?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let messages = serde_json::from_slice(&body)
            .and_then(IncomingMessage::parse_all)
            .map_err(|e| self.error("invalid JSON-RPC response body").with_source(e))?;
        self.queue.extend(messages);
        Ok(())
    }
}

#[async_trait]
impl Channel for HttpChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let body = serde_json::to_vec(message)
            .map_err(|e| self.error("failed to encode message").with_source(e))?;

        let response = self
            .http
            .post(self.url.clone())
            .headers(self.request_headers())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.error(format!("request to {} failed", self.url)).with_source(e))?;

        if let Some(id) = response.headers().get(SESSION_ID_HEADER) {
            if self.session_id.as_ref() != Some(id) {
                tracing::debug!(server = %self.server, "session id assigned");
            }
            self.session_id = Some(id.clone());
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.session_id.is_some() {
            return Err(self.error("session expired on server"));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!(
                "server returned {status}: {}",
                secret::excerpt(&body, 200)
            )));
        }
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if is_stream {
            self.stream = Some(event_stream(response.bytes_stream()).boxed());
            Ok(())
        } else {
            self.read_json_body(response).await
        }
    }

    async fn receive(&mut self) -> Result<IncomingMessage, TransportError> {
        loop {
            if let Some(message) = self.queue.pop_front() {
                return Ok(message);
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(self.error("no response pending"));
            };

            match stream.next().await {
                Some(Ok(event)) if event.event_type() == "message" => {
                    let messages = decode_message(&event)
                        .map_err(|e| self.error("invalid message event").with_source(e))?;
                    self.queue.extend(messages);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(self.error("response stream failed").with_source(e));
                }
                None => self.stream = None,
            }
        }
    }

    fn set_protocol_version(&mut self, version: &str) {
        if let Ok(value) = HeaderValue::from_str(version) {
            self.headers.insert(PROTOCOL_VERSION_HEADER, value);
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        self.queue.clear();

        let Some(id) = self.session_id.take() else {
            return Ok(());
        };

        let result = self
            .http
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_ID_HEADER, id)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                tracing::debug!(server = %self.server, "server does not support session termination");
            }
            Ok(response) => {
                tracing::debug!(server = %self.server, status = %response.status(), "session terminated");
            }
            Err(e) => {
                tracing::debug!(server = %self.server, error = %e, "session termination failed");
            }
        }
        Ok(())
    }
}
