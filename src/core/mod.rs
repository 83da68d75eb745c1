//! Core client logic shared by the CLI and library users.

pub mod mcp;
pub mod secret;
