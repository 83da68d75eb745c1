//! In-memory channels and connectors for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::auth::{AuthManager, Credentials, TokenStore};
use super::config::{ServerDescriptor, TransportKind};
use super::protocol::{
    ClientInfo, IncomingMessage, JsonRpcRequest, JsonRpcResponse, OutgoingMessage,
};
use super::session::SessionManager;
use super::transport::{Channel, Connector, TransportError};

type Script = Arc<dyn Fn(&JsonRpcRequest) -> Vec<IncomingMessage> + Send + Sync>;

/// Successful reply to `request`
pub(crate) fn reply(request: &JsonRpcRequest, result: Value) -> Vec<IncomingMessage> {
    vec![IncomingMessage::Response(JsonRpcResponse::success(
        request.id.clone(),
        result,
    ))]
}

/// Error reply to `request`
pub(crate) fn error(request: &JsonRpcRequest, code: i64, message: &str) -> Vec<IncomingMessage> {
    vec![IncomingMessage::Response(JsonRpcResponse::failure(
        request.id.clone(),
        code,
        message,
    ))]
}

/// `initialize` result body
pub(crate) fn initialize(version: &str, capabilities: Value) -> Value {
    json!({
        "protocolVersion": version,
        "capabilities": capabilities,
        "serverInfo": {"name": "fake", "version": "0.0.0"}
    })
}

/// Channel answering each request through a script
pub(crate) struct ScriptedChannel {
    script: Script,
    queue: VecDeque<IncomingMessage>,
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedChannel {
    pub(crate) fn new(
        script: impl Fn(&JsonRpcRequest) -> Vec<IncomingMessage> + Send + Sync + 'static,
    ) -> Self {
        Self::from_script(Arc::new(script), Arc::default())
    }

    fn from_script(script: Script, closes: Arc<AtomicUsize>) -> Self {
        Self {
            script,
            queue: VecDeque::new(),
            sent: Arc::default(),
            closes,
        }
    }

    /// Everything the client wrote
    pub(crate) fn sent(&self) -> Arc<Mutex<Vec<OutgoingMessage>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalProcess
    }

    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message.clone());
        if let OutgoingMessage::Request(request) = message {
            self.queue.extend((self.script)(request));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<IncomingMessage, TransportError> {
        self.queue.pop_front().ok_or_else(|| {
            TransportError::new(TransportKind::LocalProcess, "fake", "script has no reply")
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector serving scripted servers by name
#[derive(Default)]
pub(crate) struct FakeConnector {
    servers: HashMap<String, Script>,
    failures: Mutex<HashMap<String, u32>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_server(
        mut self,
        name: &str,
        script: impl Fn(&JsonRpcRequest) -> Vec<IncomingMessage> + Send + Sync + 'static,
    ) -> Self {
        self.servers.insert(name.to_string(), Arc::new(script));
        self
    }

    /// Server offering `tools`; calls answer with `"<server>:<tool>"`.
    pub(crate) fn with_tool_server(self, name: &str, tools: &[&str]) -> Self {
        let server = name.to_string();
        let tools: Vec<Value> = tools.iter().map(|t| json!({"name": t})).collect();
        self.with_server(name, move |request| match request.method.as_str() {
            "initialize" => reply(request, initialize("2025-06-18", json!({"tools": {}}))),
            "tools/list" => reply(request, json!({ "tools": tools })),
            "tools/call" => {
                let tool = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                reply(
                    request,
                    json!({"content": [{"type": "text", "text": format!("{server}:{tool}")}]}),
                )
            }
            "ping" => reply(request, json!({})),
            _ => error(request, -32601, "method not found"),
        })
    }

    /// Fail the next `count` opens of `name` with a transport error
    pub(crate) fn with_failures(self, name: &str, count: u32) -> Self {
        self.failures.lock().insert(name.to_string(), count);
        self
    }

    pub(crate) fn opens(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }

    pub(crate) fn closes(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }

    pub(crate) fn session_manager(self) -> SessionManager {
        SessionManager::new(Arc::new(self), Arc::new(auth_manager()), ClientInfo::default())
    }
}

/// Auth manager whose store is never touched by servers without OAuth
pub(crate) fn auth_manager() -> AuthManager {
    AuthManager::new(TokenStore::with_root(
        std::env::temp_dir().join("omni-mcp-unit-tokens"),
    ))
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(
        &self,
        descriptor: &ServerDescriptor,
        _credentials: &Credentials,
    ) -> Result<Box<dyn Channel>, TransportError> {
        let name = descriptor.name.as_str();
        self.opens.fetch_add(1, Ordering::SeqCst);

        let fail = match self.failures.lock().get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if fail {
            return Err(TransportError::new(
                descriptor.kind(),
                name,
                "connection refused",
            ));
        }

        let script = self.servers.get(name).cloned().ok_or_else(|| {
            TransportError::new(descriptor.kind(), name, "no such fake server")
        })?;
        Ok(Box::new(ScriptedChannel::from_script(
            script,
            Arc::clone(&self.closes),
        )))
    }
}
