//! Model Context Protocol (MCP) client manager
//!
//! Connects to any number of MCP servers over local-process stdio,
//! streamable HTTP or legacy SSE, authenticates them (basic or OAuth2 with
//! PKCE), retries flaky connections and routes tool calls to the preferred
//! server. Every operation runs in its own open-use-close session.

pub mod auth;
pub mod blocking;
pub mod config;
pub mod env;
mod error;
pub mod manager;
pub mod protocol;
pub mod retry;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

pub use auth::{
    AuthConfig, AuthError, AuthManager, AuthState, AuthorizationHandler, AuthorizationRequest,
    AuthorizationResponse, Credentials, OAuthConfig, OAuthError, TokenRecord, TokenStore,
};
pub use blocking::BlockingMcpManager;
pub use config::{ConfigError, McpConfig, ServerDescriptor, TransportConfig, TransportKind};
pub use error::{McpError, McpResult};
pub use manager::{McpManager, ServerStatus};
pub use protocol::{
    CallToolResult, Capability, ClientInfo, Content, GetPromptResult, Listing, Prompt, Resource,
    ResourceTemplate, Tagged, Tool,
};
pub use retry::RetryPolicy;
pub use session::{Session, SessionManager};
pub use transport::{Channel, Connector, TransportConnector, TransportError};
