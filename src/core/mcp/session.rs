//! One open-use-close conversation with a server
//!
//! A [`Session`] owns a channel for the duration of a single operation.
//! [`SessionManager::with_session`] acquires credentials, opens the channel
//! and performs the handshake under the server's retry policy, hands the
//! session to the caller, and always closes the channel afterwards.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use super::auth::AuthManager;
use super::config::ServerDescriptor;
use super::error::{McpError, McpResult, RESOURCE_NOT_FOUND_CODE};
use super::protocol::{
    CallToolResult, Capability, ClientInfo, GetPromptResult, IncomingMessage, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, OutgoingMessage,
    Prompt, ReadResourceResult, RequestId, Resource, ResourceTemplate,
    SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, Tool,
};
use super::retry::with_retry;
use super::transport::{Channel, Connector, TransportError};

/// An initialized session with one server
pub struct Session {
    server: String,
    channel: Box<dyn Channel>,
    next_id: i64,
    request_timeout: Duration,
    init: Option<InitializeResult>,
}

impl Session {
    /// Wrap a freshly opened channel. Call [`Session::initialize`] before use.
    #[must_use]
    pub fn new(server: impl Into<String>, channel: Box<dyn Channel>, request_timeout: Duration) -> Self {
        Self {
            server: server.into(),
            channel,
            next_id: 1,
            request_timeout,
            init: None,
        }
    }

    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Handshake result, once initialized
    #[must_use]
    pub const fn initialize_result(&self) -> Option<&InitializeResult> {
        self.init.as_ref()
    }

    /// Negotiated protocol revision
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.init.as_ref().map(|init| init.protocol_version.as_str())
    }

    fn capabilities(&self) -> ServerCapabilities {
        self.init
            .as_ref()
            .map(|init| init.capabilities.clone())
            .unwrap_or_default()
    }

    /// Run the `initialize` handshake.
    pub async fn initialize(&mut self, client: &ClientInfo) -> McpResult<&InitializeResult> {
        let id = self.take_id();
        let value = match self
            .round_trip(JsonRpcRequest::initialize(id, client))
            .await
        {
            Ok(value) => value,
            Err(McpError::Server { code, message, .. }) => {
                return Err(self.handshake_error(format!("server rejected initialize ({code}): {message}")));
            }
            Err(e) => return Err(e),
        };

        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| self.handshake_error(format!("invalid initialize result: {e}")))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(self.handshake_error(format!(
                "unsupported protocol version '{}'",
                result.protocol_version
            )));
        }

        self.channel.set_protocol_version(&result.protocol_version);
        self.notify(JsonRpcNotification::initialized()).await?;

        tracing::debug!(
            server = %self.server,
            version = %result.protocol_version,
            name = result.server_info.as_ref().map_or("", |info| info.name.as_str()),
            "session initialized"
        );

        Ok(self.init.insert(result))
    }

    fn handshake_error(&self, reason: String) -> McpError {
        McpError::Handshake {
            server: self.server.clone(),
            reason,
        }
    }

    fn take_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let id = self.take_id();
        self.round_trip(JsonRpcRequest::new(id, method, params)).await
    }

    async fn round_trip(&mut self, request: JsonRpcRequest) -> McpResult<Value> {
        let id = request.id.clone();
        let method = request.method.clone();
        let kind = self.channel.kind();

        self.channel.send(&OutgoingMessage::Request(request)).await?;

        let timeout = self.request_timeout;
        match tokio::time::timeout(timeout, self.await_response(&id)).await {
            Ok(response) => response?.into_result(&self.server),
            Err(_) => Err(TransportError::new(
                kind,
                &self.server,
                format!("no response to '{method}' within {}s", timeout.as_secs_f64()),
            )
            .into()),
        }
    }

    async fn await_response(&mut self, id: &RequestId) -> McpResult<JsonRpcResponse> {
        loop {
            match self.channel.receive().await? {
                // an error with a null id answers whatever is in flight
                IncomingMessage::Response(response)
                    if response.id.is_none() || response.id.as_ref() == Some(id) =>
                {
                    return Ok(response);
                }
                IncomingMessage::Response(response) => {
                    tracing::debug!(
                        server = %self.server,
                        id = ?response.id,
                        "discarding response for another request"
                    );
                }
                IncomingMessage::Request(request) => self.answer(request).await?,
                IncomingMessage::Notification(notification) => {
                    tracing::debug!(server = %self.server, method = %notification.method, "notification");
                }
            }
        }
    }

    /// Reply to a server-initiated request.
    async fn answer(&mut self, request: JsonRpcRequest) -> McpResult<()> {
        let reply = if request.method == "ping" {
            JsonRpcResponse::success(request.id, json!({}))
        } else {
            tracing::debug!(server = %self.server, method = %request.method, "unsupported server request");
            JsonRpcResponse::failure(
                request.id,
                METHOD_NOT_FOUND,
                format!("method '{}' not supported by client", request.method),
            )
        };
        self.channel.send(&OutgoingMessage::Response(reply)).await?;
        Ok(())
    }

    async fn notify(&mut self, notification: JsonRpcNotification) -> McpResult<()> {
        self.channel
            .send(&OutgoingMessage::Notification(notification))
            .await?;
        Ok(())
    }

    /// Fetch every page of a list method.
    ///
    /// A cursor seen before means the server is cycling, which fails the call.
    async fn list_all<T: DeserializeOwned>(&mut self, method: &str, key: &str) -> McpResult<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let mut result = self.request(method, params).await?;

            let page = match result.get_mut(key).map(Value::take) {
                Some(Value::Array(page)) => page,
                Some(Value::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(McpError::protocol(
                        &self.server,
                        format!("'{key}' in {method} result is not an array"),
                    ));
                }
            };
            for item in page {
                let item = serde_json::from_value(item).map_err(|e| {
                    McpError::protocol(&self.server, format!("invalid entry in {method} result: {e}"))
                })?;
                items.push(item);
            }

            let next = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);

            match next {
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(McpError::protocol(
                        &self.server,
                        format!("{method} returned cursor '{next}' twice"),
                    ));
                }
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
    }

    pub async fn list_tools(&mut self) -> McpResult<Vec<Tool>> {
        if self.capabilities().tools.is_none() {
            return Ok(Vec::new());
        }
        self.list_all("tools/list", "tools").await
    }

    pub async fn list_resources(&mut self) -> McpResult<Vec<Resource>> {
        if self.capabilities().resources.is_none() {
            return Ok(Vec::new());
        }
        self.list_all("resources/list", "resources").await
    }

    pub async fn list_resource_templates(&mut self) -> McpResult<Vec<ResourceTemplate>> {
        if self.capabilities().resources.is_none() {
            return Ok(Vec::new());
        }
        self.list_all("resources/templates/list", "resourceTemplates")
            .await
    }

    pub async fn list_prompts(&mut self) -> McpResult<Vec<Prompt>> {
        if self.capabilities().prompts.is_none() {
            return Ok(Vec::new());
        }
        self.list_all("prompts/list", "prompts").await
    }

    /// Every advertised capability: tools, resources, templates, prompts
    pub async fn list_capabilities(&mut self) -> McpResult<Vec<Capability>> {
        let mut all: Vec<Capability> = self
            .list_tools()
            .await?
            .into_iter()
            .map(Capability::Tool)
            .collect();
        all.extend(self.list_resources().await?.into_iter().map(Capability::Resource));
        all.extend(
            self.list_resource_templates()
                .await?
                .into_iter()
                .map(Capability::ResourceTemplate),
        );
        all.extend(self.list_prompts().await?.into_iter().map(Capability::Prompt));
        Ok(all)
    }

    pub async fn has_tool(&mut self, name: &str) -> McpResult<bool> {
        Ok(self.list_tools().await?.iter().any(|tool| tool.name == name))
    }

    pub async fn has_prompt(&mut self, name: &str) -> McpResult<bool> {
        Ok(self.list_prompts().await?.iter().any(|prompt| prompt.name == name))
    }

    /// Invoke a tool. `arguments` must be a JSON object or null.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        let arguments = object_or_empty(&self.server, "tool arguments", arguments)?;
        let value = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::protocol(&self.server, format!("invalid tools/call result: {e}")))
    }

    pub async fn read_resource(&mut self, uri: &str) -> McpResult<ReadResourceResult> {
        let value = match self
            .request("resources/read", Some(json!({ "uri": uri })))
            .await
        {
            Ok(value) => value,
            Err(McpError::Server { code, .. }) if code == RESOURCE_NOT_FOUND_CODE => {
                return Err(McpError::ResourceNotFound {
                    uri: uri.to_string(),
                    server: self.server.clone(),
                });
            }
            Err(e) => return Err(e),
        };
        serde_json::from_value(value).map_err(|e| {
            McpError::protocol(&self.server, format!("invalid resources/read result: {e}"))
        })
    }

    /// Render a prompt. `arguments` must be a JSON object or null.
    pub async fn get_prompt(&mut self, name: &str, arguments: Value) -> McpResult<GetPromptResult> {
        let arguments = object_or_empty(&self.server, "prompt arguments", arguments)?;
        let value = self
            .request(
                "prompts/get",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::protocol(&self.server, format!("invalid prompts/get result: {e}")))
    }

    pub async fn ping(&mut self) -> McpResult<()> {
        self.request("ping", None).await.map(|_| ())
    }

    /// Close the channel. Failures are logged, never returned.
    pub async fn close(mut self) {
        if let Err(e) = self.channel.close().await {
            tracing::debug!(server = %self.server, error = %e, "error closing channel");
        }
    }
}

fn object_or_empty(server: &str, what: &str, value: Value) -> McpResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(McpError::protocol(
            server,
            format!("{what} must be a JSON object, got {other}"),
        )),
    }
}

/// Opens sessions for the coordinator
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    auth: Arc<AuthManager>,
    client_info: ClientInfo,
}

impl SessionManager {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, auth: Arc<AuthManager>, client_info: ClientInfo) -> Self {
        Self {
            connector,
            auth,
            client_info,
        }
    }

    #[must_use]
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    #[must_use]
    pub const fn client_info(&self) -> &ClientInfo {
        &self.client_info
    }

    /// Credentials, then open and handshake under the retry policy.
    pub async fn open(&self, descriptor: &ServerDescriptor) -> McpResult<Session> {
        let credentials = self.auth.credentials(descriptor).await?;

        with_retry(&descriptor.retry, &descriptor.name, |attempt| {
            let credentials = &credentials;
            async move {
                tracing::debug!(server = %descriptor.name, attempt = attempt + 1, "opening session");
                let channel = self.connector.open(descriptor, credentials).await?;
                let mut session =
                    Session::new(descriptor.name.clone(), channel, descriptor.request_timeout);

                match session.initialize(&self.client_info).await {
                    Ok(_) => Ok(session),
                    Err(e) => {
                        session.close().await;
                        Err(e)
                    }
                }
            }
        })
        .await
    }

    /// Run one operation in a fresh session, closing it afterwards.
    pub async fn with_session<T, F>(&self, descriptor: &ServerDescriptor, operation: F) -> McpResult<T>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, McpResult<T>>,
    {
        let mut session = self.open(descriptor).await?;
        let result = operation(&mut session).await;
        session.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::core::mcp::config::ServerDescriptor;
    use crate::core::mcp::retry::RetryPolicy;
    use crate::core::mcp::testing::{FakeConnector, ScriptedChannel, error, initialize, reply};

    fn session(channel: ScriptedChannel) -> Session {
        Session::new("fake", Box::new(channel), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn negotiates_supported_version() {
        let channel = ScriptedChannel::new(|request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2024-11-05", json!({"tools": {}}))),
            _ => Vec::new(),
        });
        let sent = channel.sent();
        let mut session = session(channel);

        session.initialize(&ClientInfo::default()).await.unwrap();
        assert_eq!(session.protocol_version(), Some("2024-11-05"));

        let sent = sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[1], OutgoingMessage::Notification(n) if n.method == "notifications/initialized"));
    }

    #[tokio::test]
    async fn rejects_unsupported_version() {
        let channel = ScriptedChannel::new(|request| {
            reply(request, initialize("1999-01-01", json!({})))
        });
        let err = session(channel)
            .initialize(&ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Handshake { ref reason, .. } if reason.contains("1999-01-01")));
    }

    #[tokio::test]
    async fn answers_server_requests_and_skips_stale_responses() {
        let channel = ScriptedChannel::new(|request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2025-06-18", json!({}))),
            "ping" => {
                let mut messages = vec![
                    IncomingMessage::Request(JsonRpcRequest::new(900, "ping", None)),
                    IncomingMessage::Request(JsonRpcRequest::new(901, "sampling/createMessage", None)),
                    IncomingMessage::Response(JsonRpcResponse::success(RequestId::Number(77), json!({}))),
                ];
                messages.extend(reply(request, json!({})));
                messages
            }
            _ => Vec::new(),
        });
        let sent = channel.sent();
        let mut session = session(channel);
        session.initialize(&ClientInfo::default()).await.unwrap();
        session.ping().await.unwrap();

        let sent = sent.lock();
        let replies: Vec<_> = sent
            .iter()
            .filter_map(|m| match m {
                OutgoingMessage::Response(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(replies.len(), 2);
        assert!(replies[0].error.is_none());
        assert_eq!(replies[1].error.as_ref().unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn request_ids_increase() {
        let channel = ScriptedChannel::new(|request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2025-06-18", json!({}))),
            _ => reply(request, json!({})),
        });
        let sent = channel.sent();
        let mut session = session(channel);
        session.initialize(&ClientInfo::default()).await.unwrap();
        session.ping().await.unwrap();
        session.ping().await.unwrap();

        let ids: Vec<_> = sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                OutgoingMessage::Request(r) => Some(r.id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, [RequestId::Number(1), RequestId::Number(2), RequestId::Number(3)]);
    }

    #[tokio::test]
    async fn listing_follows_cursors() {
        let channel = ScriptedChannel::new(|request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2025-06-18", json!({"tools": {}}))),
            "tools/list" => {
                let cursor = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("cursor"))
                    .and_then(Value::as_str);
                match cursor {
                    None => reply(request, json!({"tools": [{"name": "a"}], "nextCursor": "p2"})),
                    Some("p2") => reply(request, json!({"tools": [{"name": "b"}]})),
                    Some(_) => error(request, -32602, "bad cursor"),
                }
            }
            _ => Vec::new(),
        });
        let mut session = session(channel);
        session.initialize(&ClientInfo::default()).await.unwrap();

        let names: Vec<_> = session
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn unattributed_error_fails_the_pending_request() {
        let channel = ScriptedChannel::new(|request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2025-06-18", json!({}))),
            _ => vec![IncomingMessage::Response(JsonRpcResponse {
                id: None,
                ..JsonRpcResponse::failure(request.id.clone(), -32700, "Parse error")
            })],
        });
        let mut session = session(channel);
        session.initialize(&ClientInfo::default()).await.unwrap();

        let err = session.ping().await.unwrap_err();
        assert!(matches!(err, McpError::Server { code: -32700, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn cycling_cursors_stop_the_listing() {
        let channel = ScriptedChannel::new(|request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2025-06-18", json!({"tools": {}}))),
            "tools/list" => {
                let cursor = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("cursor"))
                    .and_then(Value::as_str);
                // A -> B -> A -> ...
                let next = match cursor {
                    None | Some("B") => "A",
                    Some(_) => "B",
                };
                reply(request, json!({"tools": [{"name": "t"}], "nextCursor": next}))
            }
            _ => Vec::new(),
        });
        let mut session = session(channel);
        session.initialize(&ClientInfo::default()).await.unwrap();

        let err = session.list_tools().await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
        assert!(err.to_string().contains("cursor 'A' twice"), "{err}");
    }

    #[tokio::test]
    async fn unadvertised_classes_list_empty() {
        let channel = ScriptedChannel::new(|request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2025-06-18", json!({"tools": {}}))),
            "tools/list" => reply(request, json!({"tools": [{"name": "calc"}]})),
            other => panic!("unexpected request {other}"),
        });
        let mut session = session(channel);
        session.initialize(&ClientInfo::default()).await.unwrap();

        assert!(session.list_prompts().await.unwrap().is_empty());
        assert!(session.list_resources().await.unwrap().is_empty());
        let capabilities = session.list_capabilities().await.unwrap();
        assert_eq!(capabilities.len(), 1);
        assert!(session.has_tool("calc").await.unwrap());
        assert!(!session.has_prompt("calc").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_resource_maps_to_not_found() {
        let channel = ScriptedChannel::new(|request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2025-06-18", json!({"resources": {}}))),
            _ => error(request, RESOURCE_NOT_FOUND_CODE, "no such resource"),
        });
        let mut session = session(channel);
        session.initialize(&ClientInfo::default()).await.unwrap();

        let err = session.read_resource("file:///missing").await.unwrap_err();
        assert!(matches!(err, McpError::ResourceNotFound { ref uri, .. } if uri == "file:///missing"));
    }

    #[tokio::test]
    async fn tool_arguments_must_be_an_object() {
        let channel = ScriptedChannel::new(|request| {
            reply(request, initialize("2025-06-18", json!({"tools": {}})))
        });
        let mut session = session(channel);
        session.initialize(&ClientInfo::default()).await.unwrap();

        let err = session.call_tool("calc", json!([1, 2])).await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[tokio::test]
    async fn with_session_closes_after_operation_and_after_failure() {
        let connector = FakeConnector::new().with_tool_server("calc", &["add"]);
        let closes = connector.closes();
        let manager = connector.session_manager();
        let descriptor = ServerDescriptor::local_process("calc", "unused", Vec::<String>::new())
            .with_retry(RetryPolicy::none());

        let tools = manager
            .with_session(&descriptor, |session| Box::pin(session.list_tools()))
            .await
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let err = manager
            .with_session(&descriptor, |session| {
                Box::pin(session.call_tool("add", json!("not an object")))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "protocol");
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_handshake_closes_channel() {
        let connector = FakeConnector::new().with_server("broken", |request| {
            reply(request, initialize("0000-00-00", json!({})))
        });
        let closes = connector.closes();
        let manager = connector.session_manager();
        let descriptor = ServerDescriptor::local_process("broken", "unused", Vec::<String>::new())
            .with_retry(RetryPolicy::none());

        let err = manager
            .with_session(&descriptor, |session| Box::pin(session.ping()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
