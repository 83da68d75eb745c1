//! Multi-server coordinator
//!
//! [`McpManager`] owns the configured servers and the set currently marked
//! connected. Every capability operation opens a fresh session, so
//! "connected" only records that a handshake succeeded and no disconnect
//! followed. Operations that span servers run concurrently and keep
//! declaration order in their results.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, join_all};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use super::auth::{AuthManager, AuthState, AuthorizationRequest, AuthorizationResponse, TokenRecord};
use super::config::{McpConfig, ServerDescriptor, TransportKind};
use super::error::{McpError, McpResult};
use super::protocol::{
    CallToolResult, Capability, ClientInfo, GetPromptResult, Listing, Prompt, ReadResourceResult,
    Resource, ResourceTemplate, Tagged, Tool,
};
use super::session::{Session, SessionManager};
use super::transport::{Connector, TransportConnector};

/// Configured server and whether it is marked connected
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub transport: String,
    pub endpoint: String,
    pub priority: i64,
    pub auth: &'static str,
    pub connected: bool,
}

/// Coordinates sessions across every configured server
pub struct McpManager {
    config: McpConfig,
    auth: Arc<AuthManager>,
    sessions: SessionManager,
    connected: RwLock<HashSet<String>>,
}

impl McpManager {
    /// Create a manager using the built-in transports.
    #[must_use]
    pub fn new(config: McpConfig, auth: AuthManager) -> Self {
        let auth = Arc::new(auth);
        let sessions = SessionManager::new(
            Arc::new(TransportConnector::default()),
            Arc::clone(&auth),
            ClientInfo::default(),
        );
        Self {
            config,
            auth,
            sessions,
            connected: RwLock::new(HashSet::new()),
        }
    }

    /// Replace the channel connector
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        let client_info = self.sessions.client_info().clone();
        self.sessions = SessionManager::new(connector, Arc::clone(&self.auth), client_info);
        self
    }

    /// Identity sent in every handshake
    #[must_use]
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.sessions = SessionManager::new(self.sessions.connector(), Arc::clone(&self.auth), client_info);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &McpConfig {
        &self.config
    }

    #[must_use]
    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    fn descriptor(&self, name: &str) -> McpResult<&ServerDescriptor> {
        self.config
            .get(name)
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))
    }

    /// Descriptor of a server marked connected
    fn connected_descriptor(&self, name: &str) -> McpResult<&ServerDescriptor> {
        if !self.is_connected(name) {
            return Err(McpError::ServerNotConnected(name.to_string()));
        }
        self.descriptor(name)
    }

    /// Connected servers in declaration order, or just `name`
    fn targets(&self, name: Option<&str>) -> McpResult<Vec<&ServerDescriptor>> {
        match name {
            Some(name) => Ok(vec![self.connected_descriptor(name)?]),
            None => {
                let connected = self.connected.read();
                Ok(self
                    .config
                    .servers()
                    .iter()
                    .filter(|s| connected.contains(&s.name))
                    .collect())
            }
        }
    }

    /// Handshake with a server and mark it connected.
    pub async fn connect(&self, name: &str) -> McpResult<()> {
        let descriptor = self.descriptor(name)?;
        if self.is_connected(name) {
            tracing::debug!(server = %name, "already connected");
            return Ok(());
        }

        match self
            .sessions
            .with_session(descriptor, |_| Box::pin(async { Ok(()) }))
            .await
        {
            Ok(()) => {
                self.connected.write().insert(name.to_string());
                tracing::info!(server = %name, transport = %descriptor.kind(), "connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "connection failed");
                Err(e)
            }
        }
    }

    /// Connect every configured server concurrently.
    ///
    /// Returns one outcome per server in declaration order.
    pub async fn connect_all(&self) -> Vec<(String, McpResult<()>)> {
        let attempts = self.config.servers().iter().map(|server| async move {
            (server.name.clone(), self.connect(&server.name).await)
        });
        join_all(attempts).await
    }

    /// Unmark a server. Unknown or unconnected names are ignored.
    ///
    /// Returns whether the server was marked connected.
    pub fn disconnect(&self, name: &str) -> bool {
        let removed = self.connected.write().remove(name);
        if removed {
            tracing::info!(server = %name, "disconnected");
        }
        removed
    }

    /// Unmark every server
    pub fn disconnect_all(&self) {
        self.connected.write().clear();
    }

    #[must_use]
    pub fn is_connected(&self, name: &str) -> bool {
        self.connected.read().contains(name)
    }

    /// Every configured server with its status, in declaration order
    #[must_use]
    pub fn list_servers(&self) -> Vec<ServerStatus> {
        let connected = self.connected.read();
        self.config
            .servers()
            .iter()
            .map(|server| ServerStatus {
                name: server.name.clone(),
                transport: server.kind().to_string(),
                endpoint: server.transport.endpoint(),
                priority: server.priority,
                auth: server.auth.kind(),
                connected: connected.contains(&server.name),
            })
            .collect()
    }

    /// Priority of every configured server
    #[must_use]
    pub fn server_priorities(&self) -> BTreeMap<String, i64> {
        self.config
            .servers()
            .iter()
            .map(|server| (server.name.clone(), server.priority))
            .collect()
    }

    /// Transport kind of a configured server
    #[must_use]
    pub fn transport_kind(&self, name: &str) -> Option<TransportKind> {
        self.config.get(name).map(ServerDescriptor::kind)
    }

    /// Gather items from one server or every connected server.
    ///
    /// A named server that fails fails the whole call; across all servers
    /// failures are collected next to the items that did arrive.
    async fn collect<T, F>(&self, name: Option<&str>, fetch: F) -> McpResult<Listing<T>>
    where
        F: for<'a> Fn(&'a mut Session) -> BoxFuture<'a, McpResult<Vec<T>>> + Sync,
    {
        let targets = self.targets(name)?;
        let results = join_all(targets.iter().map(|descriptor| {
            let fetch = &fetch;
            async move {
                let result = self.sessions.with_session(descriptor, fetch).await;
                (descriptor.name.clone(), result)
            }
        }))
        .await;

        let mut listing = Listing::default();
        for (server, result) in results {
            match result {
                Ok(items) => listing
                    .items
                    .extend(items.into_iter().map(|item| Tagged::new(server.clone(), item))),
                Err(e) if name.is_some() => return Err(e),
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "listing failed");
                    listing.errors.push((server, e));
                }
            }
        }
        Ok(listing)
    }

    pub async fn list_tools(&self, name: Option<&str>) -> McpResult<Listing<Tool>> {
        self.collect(name, |session| Box::pin(session.list_tools()))
            .await
    }

    pub async fn list_resources(&self, name: Option<&str>) -> McpResult<Listing<Resource>> {
        self.collect(name, |session| Box::pin(session.list_resources()))
            .await
    }

    pub async fn list_resource_templates(
        &self,
        name: Option<&str>,
    ) -> McpResult<Listing<ResourceTemplate>> {
        self.collect(name, |session| Box::pin(session.list_resource_templates()))
            .await
    }

    pub async fn list_prompts(&self, name: Option<&str>) -> McpResult<Listing<Prompt>> {
        self.collect(name, |session| Box::pin(session.list_prompts()))
            .await
    }

    /// Tools, resources, templates and prompts in one listing
    pub async fn list_capabilities(&self, name: Option<&str>) -> McpResult<Listing<Capability>> {
        self.collect(name, |session| Box::pin(session.list_capabilities()))
            .await
    }

    /// Call a tool on a specific server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> McpResult<CallToolResult> {
        let descriptor = self.connected_descriptor(server)?;
        tracing::info!(server = %server, tool = %tool, "calling tool");

        let tool = tool.to_string();
        self.sessions
            .with_session(descriptor, move |session| {
                Box::pin(async move {
                    if !session.has_tool(&tool).await? {
                        return Err(McpError::ToolNotFound {
                            server: Some(session.server().to_string()),
                            tool,
                        });
                    }
                    session.call_tool(&tool, arguments).await
                })
            })
            .await
    }

    /// Call a tool on the best server offering it.
    ///
    /// Returns the chosen server with the result.
    pub async fn call_tool_any(
        &self,
        tool: &str,
        arguments: Value,
    ) -> McpResult<(String, CallToolResult)> {
        let server = self
            .find_best_server_for_tool(tool)
            .await
            .ok_or_else(|| McpError::ToolNotFound {
                tool: tool.to_string(),
                server: None,
            })?;
        let result = self.call_tool(&server, tool, arguments).await?;
        Ok((server, result))
    }

    pub async fn read_resource(&self, server: &str, uri: &str) -> McpResult<ReadResourceResult> {
        let descriptor = self.connected_descriptor(server)?;
        let uri = uri.to_string();
        self.sessions
            .with_session(descriptor, move |session| {
                Box::pin(async move { session.read_resource(&uri).await })
            })
            .await
    }

    pub async fn get_prompt(
        &self,
        server: &str,
        prompt: &str,
        arguments: Value,
    ) -> McpResult<GetPromptResult> {
        let descriptor = self.connected_descriptor(server)?;
        let prompt = prompt.to_string();
        self.sessions
            .with_session(descriptor, move |session| {
                Box::pin(async move {
                    if !session.has_prompt(&prompt).await? {
                        return Err(McpError::PromptNotFound {
                            server: Some(session.server().to_string()),
                            prompt,
                        });
                    }
                    session.get_prompt(&prompt, arguments).await
                })
            })
            .await
    }

    /// Connected servers offering `tool`, best first.
    ///
    /// Lower priority wins; equal priorities keep declaration order. Servers
    /// that cannot be queried are skipped.
    pub async fn find_servers_with_tool(&self, tool: &str) -> Vec<String> {
        let wanted = tool.to_string();
        let results = self
            .broadcast(|session| {
                let wanted = wanted.clone();
                Box::pin(async move { session.has_tool(&wanted).await })
            })
            .await;

        let mut matches: Vec<(i64, String)> = results
            .into_iter()
            .filter_map(|(server, result)| match result {
                Ok(true) => {
                    let priority = self.config.get(&server).map_or(i64::MAX, |s| s.priority);
                    Some((priority, server))
                }
                Ok(false) => None,
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "skipping server during tool lookup");
                    None
                }
            })
            .collect();

        // stable: ties stay in declaration order
        matches.sort_by_key(|(priority, _)| *priority);
        matches.into_iter().map(|(_, server)| server).collect()
    }

    /// Preferred connected server offering `tool`
    pub async fn find_best_server_for_tool(&self, tool: &str) -> Option<String> {
        let best = self.find_servers_with_tool(tool).await.into_iter().next();
        if let Some(server) = &best {
            tracing::debug!(tool = %tool, server = %server, "selected server for tool");
        }
        best
    }

    /// Run `operation` against every connected server concurrently.
    ///
    /// One slot per connected server, in declaration order.
    pub async fn broadcast<T, F>(&self, operation: F) -> Vec<(String, McpResult<T>)>
    where
        F: for<'a> Fn(&'a mut Session) -> BoxFuture<'a, McpResult<T>> + Sync,
    {
        let targets = self.targets(None).unwrap_or_default();
        join_all(targets.into_iter().map(|descriptor| {
            let operation = &operation;
            async move {
                let result = self.sessions.with_session(descriptor, operation).await;
                (descriptor.name.clone(), result)
            }
        }))
        .await
    }

    /// Start OAuth authorization for a server
    pub fn begin_authorization(&self, server: &str) -> McpResult<AuthorizationRequest> {
        let descriptor = self.descriptor(server)?;
        Ok(self.auth.begin_authorization(descriptor)?)
    }

    /// Finish OAuth authorization with the callback parameters
    pub async fn complete_authorization(
        &self,
        server: &str,
        response: AuthorizationResponse,
    ) -> McpResult<TokenRecord> {
        let descriptor = self.descriptor(server)?;
        Ok(self.auth.complete_authorization(descriptor, response).await?)
    }

    #[must_use]
    pub fn auth_state(&self, server: &str) -> AuthState {
        self.auth.state(server)
    }

    /// Cached OAuth token for a server
    pub async fn token(&self, server: &str) -> McpResult<Option<TokenRecord>> {
        self.descriptor(server)?;
        Ok(self.auth.token(server).await?)
    }

    /// Forget a server's token and mark it disconnected
    pub async fn logout(&self, server: &str) -> McpResult<()> {
        self.descriptor(server)?;
        self.disconnect(server);
        Ok(self.auth.logout(server).await?)
    }
}
