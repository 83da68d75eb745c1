//! Blocking facade over [`McpManager`]
//!
//! Each call builds a current-thread runtime, drives one manager operation to
//! completion and drops the runtime. Nothing async outlives the call, so the
//! facade is usable from plain threads. Calling it from inside a Tokio runtime
//! is rejected with [`McpError::Runtime`].

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;

use super::auth::{AuthManager, AuthState, AuthorizationRequest, AuthorizationResponse, TokenRecord};
use super::config::McpConfig;
use super::error::{McpError, McpResult};
use super::manager::{McpManager, ServerStatus};
use super::protocol::{
    CallToolResult, Capability, GetPromptResult, Listing, Prompt, ReadResourceResult, Resource,
    ResourceTemplate, Tool,
};

pub struct BlockingMcpManager {
    inner: McpManager,
}

impl BlockingMcpManager {
    #[must_use]
    pub fn new(config: McpConfig, auth: AuthManager) -> Self {
        Self::from_manager(McpManager::new(config, auth))
    }

    #[must_use]
    pub const fn from_manager(inner: McpManager) -> Self {
        Self { inner }
    }

    #[must_use]
    pub const fn inner(&self) -> &McpManager {
        &self.inner
    }

    fn run<T>(&self, operation: impl Future<Output = McpResult<T>>) -> McpResult<T> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(McpError::Runtime(std::io::Error::other(
                "blocking MCP call made from inside an async runtime",
            )));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(McpError::Runtime)?;
        runtime.block_on(operation)
    }

    pub fn connect(&self, name: &str) -> McpResult<()> {
        self.run(self.inner.connect(name))
    }

    pub fn connect_all(&self) -> McpResult<Vec<(String, McpResult<()>)>> {
        self.run(async { Ok(self.inner.connect_all().await) })
    }

    pub fn disconnect(&self, name: &str) -> bool {
        self.inner.disconnect(name)
    }

    #[must_use]
    pub fn is_connected(&self, name: &str) -> bool {
        self.inner.is_connected(name)
    }

    #[must_use]
    pub fn list_servers(&self) -> Vec<ServerStatus> {
        self.inner.list_servers()
    }

    #[must_use]
    pub fn server_priorities(&self) -> BTreeMap<String, i64> {
        self.inner.server_priorities()
    }

    pub fn list_tools(&self, name: Option<&str>) -> McpResult<Listing<Tool>> {
        self.run(self.inner.list_tools(name))
    }

    pub fn list_resources(&self, name: Option<&str>) -> McpResult<Listing<Resource>> {
        self.run(self.inner.list_resources(name))
    }

    pub fn list_resource_templates(&self, name: Option<&str>) -> McpResult<Listing<ResourceTemplate>> {
        self.run(self.inner.list_resource_templates(name))
    }

    pub fn list_prompts(&self, name: Option<&str>) -> McpResult<Listing<Prompt>> {
        self.run(self.inner.list_prompts(name))
    }

    pub fn list_capabilities(&self, name: Option<&str>) -> McpResult<Listing<Capability>> {
        self.run(self.inner.list_capabilities(name))
    }

    pub fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> McpResult<CallToolResult> {
        self.run(self.inner.call_tool(server, tool, arguments))
    }

    pub fn call_tool_any(&self, tool: &str, arguments: Value) -> McpResult<(String, CallToolResult)> {
        self.run(self.inner.call_tool_any(tool, arguments))
    }

    pub fn read_resource(&self, server: &str, uri: &str) -> McpResult<ReadResourceResult> {
        self.run(self.inner.read_resource(server, uri))
    }

    pub fn get_prompt(&self, server: &str, prompt: &str, arguments: Value) -> McpResult<GetPromptResult> {
        self.run(self.inner.get_prompt(server, prompt, arguments))
    }

    pub fn find_servers_with_tool(&self, tool: &str) -> McpResult<Vec<String>> {
        self.run(async { Ok(self.inner.find_servers_with_tool(tool).await) })
    }

    pub fn find_best_server_for_tool(&self, tool: &str) -> McpResult<Option<String>> {
        self.run(async { Ok(self.inner.find_best_server_for_tool(tool).await) })
    }

    pub fn begin_authorization(&self, server: &str) -> McpResult<AuthorizationRequest> {
        self.inner.begin_authorization(server)
    }

    pub fn complete_authorization(
        &self,
        server: &str,
        response: AuthorizationResponse,
    ) -> McpResult<TokenRecord> {
        self.run(self.inner.complete_authorization(server, response))
    }

    #[must_use]
    pub fn auth_state(&self, server: &str) -> AuthState {
        self.inner.auth_state(server)
    }

    pub fn logout(&self, server: &str) -> McpResult<()> {
        self.run(self.inner.logout(server))
    }
}
