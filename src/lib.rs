//! omni-mcp - multi-server Model Context Protocol client.
//!
//! This library provides:
//! - Server configuration with environment substitution
//! - stdio, streamable HTTP and SSE transports
//! - OAuth2 with PKCE, a token cache and refresh
//! - A coordinator that routes calls across servers by priority
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  ┌──────────────────────┐
//! │     CLI     │  │  BlockingMcpManager  │
//! └──────┬──────┘  └──────────┬───────────┘
//!        └─────────┬──────────┘
//!           ┌──────┴──────┐
//!           │ McpManager  │
//!           └──────┬──────┘
//!           ┌──────┴──────┐
//!           │  Sessions   │──── Auth, Retry
//!           └──────┬──────┘
//!           ┌──────┴──────┐
//!           │ Transports  │
//!           └─────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod core;

pub use config::Config;
pub use core::mcp::{BlockingMcpManager, McpConfig, McpError, McpManager, McpResult};
