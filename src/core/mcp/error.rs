//! MCP client error taxonomy

use serde_json::Value;
use thiserror::Error;

use super::auth::AuthError;
use super::config::ConfigError;
use super::transport::TransportError;

/// JSON-RPC error code servers use for unknown resources.
pub const RESOURCE_NOT_FOUND_CODE: i64 = -32002;

/// Errors raised by the MCP client manager.
///
/// Every variant that wraps a lower-level failure keeps it as its `source`,
/// so the original cause survives up to the caller.
#[derive(Debug, Error)]
pub enum McpError {
    /// Server configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Channel could not be opened or broke mid-exchange.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Credentials could not be produced for a server.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Operation targeted a server that is not marked connected.
    #[error("server '{0}' is not connected")]
    ServerNotConnected(String),

    /// Server name does not appear in the configuration.
    #[error("server '{0}' not found in configuration")]
    UnknownServer(String),

    /// All connection attempts failed.
    #[error("failed to connect to server '{server}' after {attempts} attempts: {source}")]
    Connection {
        server: String,
        attempts: u32,
        #[source]
        source: Box<McpError>,
    },

    /// Protocol handshake was rejected or returned an unusable answer.
    #[error("handshake with server '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },

    /// Server returned a JSON-RPC error.
    #[error("server '{server}' returned error {code}: {message}")]
    Server {
        server: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Server sent a message that does not match the expected wire shape.
    #[error("protocol error from server '{server}': {reason}")]
    Protocol { server: String, reason: String },

    /// Named tool is not offered by the targeted (or any connected) server.
    #[error("tool '{tool}' not found{}", on_server(server.as_deref()))]
    ToolNotFound { tool: String, server: Option<String> },

    /// Resource URI is unknown to the targeted server.
    #[error("resource '{uri}' not found on server '{server}'")]
    ResourceNotFound { uri: String, server: String },

    /// Named prompt is not offered by the targeted server.
    #[error("prompt '{prompt}' not found{}", on_server(server.as_deref()))]
    PromptNotFound {
        prompt: String,
        server: Option<String>,
    },

    /// Blocking facade could not start its runtime.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

fn on_server(server: Option<&str>) -> String {
    server.map_or_else(
        || " on any connected server".to_string(),
        |name| format!(" on server '{name}'"),
    )
}

impl McpError {
    /// Whether retrying the same connection attempt could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Handshake { .. } | Self::Server { .. } | Self::Protocol { .. }
        )
    }

    /// Machine-readable error kind for downstream consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Transport(_) => "transport",
            Self::Auth(AuthError::Config(_)) => "auth_config",
            Self::Auth(AuthError::Refresh { .. }) => "refresh",
            Self::Auth(AuthError::AuthorizationRequired { .. }) => "authorization_required",
            Self::Auth(_) => "authorization",
            Self::ServerNotConnected(_) => "server_not_connected",
            Self::UnknownServer(_) => "unknown_server",
            Self::Connection { .. } => "connection",
            Self::Handshake { .. } => "handshake",
            Self::Server { .. } => "server",
            Self::Protocol { .. } => "protocol",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::ResourceNotFound { .. } => "resource_not_found",
            Self::PromptNotFound { .. } => "prompt_not_found",
            Self::Runtime(_) => "runtime",
        }
    }

    pub(crate) fn protocol(server: &str, reason: impl Into<String>) -> Self {
        Self::Protocol {
            server: server.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for MCP client operations.
pub type McpResult<T> = std::result::Result<T, McpError>;
