//! Server-sent events: stream parser and the legacy SSE transport
//!
//! The legacy transport opens a `GET` event stream, waits for an `endpoint`
//! event naming the URL client messages are POSTed to, and then reads server
//! messages from `message` events.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use url::Url;

use super::{Channel, TransportError};
use crate::core::mcp::config::TransportKind;
use crate::core::mcp::protocol::{IncomingMessage, OutgoingMessage};
use crate::core::secret;

/// How long to wait for the `endpoint` event after connecting
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// One dispatched SSE event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Event type, `message` when the server did not name one
    #[must_use]
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Parse a single SSE event from the buffer.
///
/// Returns the parsed event (if any) and the remaining buffer content, or
/// `None` when the buffer does not yet hold a complete event. Expects `\n`
/// line endings.
pub fn parse_event(buffer: &str) -> Option<(Option<SseEvent>, String)> {
    let end = buffer.find("\n\n")?;
    let block = &buffer[..end];
    let remainder = buffer[end + 2..].to_string();

    let mut event = SseEvent::default();
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => data.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data.is_empty() {
        return Some((None, remainder));
    }

    event.data = data.join("\n");
    Some((Some(event), remainder))
}

/// Turn a byte stream into a stream of SSE events.
pub fn event_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<SseEvent, E>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Send + 'static,
{
    async_stream::stream! {
        let mut pending: Vec<u8> = Vec::new();
        let mut buffer = String::new();

        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    break;
                }
            };

            pending.extend_from_slice(chunk.as_ref());
            buffer.push_str(&take_utf8(&mut pending));
            if buffer.contains("\r\n") {
                buffer = buffer.replace("\r\n", "\n");
            }

            while let Some((event, remainder)) = parse_event(&buffer) {
                buffer = remainder;
                if let Some(event) = event {
                    yield Ok(event);
                }
            }
        }
    }
}

/// Drain the decodable prefix of `pending`, keeping an incomplete trailing
/// UTF-8 sequence for the next chunk.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(text) => text.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let head: Vec<u8> = pending.drain(..valid).collect();
    String::from_utf8_lossy(&head).into_owned()
}

/// Decode `message` event payloads into protocol messages
pub(crate) fn decode_message(event: &SseEvent) -> Result<Vec<IncomingMessage>, serde_json::Error> {
    serde_json::from_str(&event.data).and_then(IncomingMessage::parse_all)
}

/// Legacy SSE channel
pub struct SseChannel {
    server: String,
    http: reqwest::Client,
    headers: HeaderMap,
    endpoint: Url,
    events: BoxStream<'static, Result<SseEvent, reqwest::Error>>,
    queue: VecDeque<IncomingMessage>,
}

impl SseChannel {
    /// Open the event stream and wait for the message endpoint.
    pub async fn connect(
        server: &str,
        url: Url,
        http: reqwest::Client,
        headers: HeaderMap,
    ) -> Result<Self, TransportError> {
        let error = |message: String| TransportError::new(TransportKind::Sse, server, message);

        let response = http
            .get(url.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| error(format!("failed to connect to {url}")).with_source(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error(format!(
                "event stream returned {status}: {}",
                secret::excerpt(&body, 200)
            )));
        }

        let mut events = event_stream(response.bytes_stream()).boxed();

        let wait = async {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event_type() == "endpoint" => return Ok(event.data),
                    Ok(event) => {
                        tracing::debug!(server = %server, event = %event.event_type(), "ignoring event before endpoint");
                    }
                    Err(e) => return Err(error("event stream failed".to_string()).with_source(e)),
                }
            }
            Err(error("event stream ended before endpoint event".to_string()))
        };

        let endpoint = tokio::time::timeout(ENDPOINT_TIMEOUT, wait)
            .await
            .map_err(|_| error(format!("no endpoint event within {}s", ENDPOINT_TIMEOUT.as_secs())))??;

        let endpoint = url
            .join(endpoint.trim())
            .map_err(|e| error(format!("invalid endpoint '{endpoint}'")).with_source(e))?;

        if endpoint.origin() != url.origin() {
            return Err(error(format!(
                "endpoint {endpoint} does not match origin of {url}"
            )));
        }

        tracing::debug!(server = %server, endpoint = %endpoint, "SSE endpoint received");

        Ok(Self {
            server: server.to_string(),
            http,
            headers,
            endpoint,
            events,
            queue: VecDeque::new(),
        })
    }

    fn error(&self, message: impl Into<String>) -> TransportError {
        TransportError::new(TransportKind::Sse, &self.server, message)
    }
}

#[async_trait]
impl Channel for SseChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let body = serde_json::to_vec(message)
            .map_err(|e| self.error("failed to encode message").with_source(e))?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.error("failed to post message").with_source(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!(
                "message endpoint returned {status}: {}",
                secret::excerpt(&body, 200)
            )));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<IncomingMessage, TransportError> {
        loop {
            if let Some(message) = self.queue.pop_front() {
                return Ok(message);
            }

            let event = match self.events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(self.error("event stream failed").with_source(e)),
                None => return Err(self.error("event stream closed")),
            };

            if event.event_type() != "message" {
                tracing::debug!(server = %self.server, event = %event.event_type(), "ignoring event");
                continue;
            }

            match decode_message(&event) {
                Ok(messages) => self.queue.extend(messages),
                Err(e) => {
                    return Err(self.error("invalid message event").with_source(e));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // dropping the response body ends the GET
        self.events = futures::stream::empty().boxed();
        self.queue.clear();
        Ok(())
    }
}
