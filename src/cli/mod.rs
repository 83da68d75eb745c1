//! CLI command parsing.

pub mod auth;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// omni-mcp - talk to Model Context Protocol servers.
#[derive(Parser)]
#[command(name = "omni-mcp")]
#[command(about = "Multi-server Model Context Protocol client")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Server descriptor file (JSON, or TOML by extension).
    #[arg(short, long, env = "OMNI_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Environment file loaded before `${VAR}` substitution (defaults to `.env`).
    #[arg(long, env = "OMNI_MCP_ENV_FILE", global = true)]
    pub env_file: Option<PathBuf>,

    /// Print JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers.
    Servers {
        /// Handshake with every server and report which ones answer.
        #[arg(long)]
        check: bool,
    },

    /// List tools.
    Tools {
        /// Only this server (defaults to every server).
        server: Option<String>,
    },

    /// List resources.
    Resources {
        /// Only this server (defaults to every server).
        server: Option<String>,
    },

    /// List resource templates.
    Templates {
        /// Only this server (defaults to every server).
        server: Option<String>,
    },

    /// List prompts.
    Prompts {
        /// Only this server (defaults to every server).
        server: Option<String>,
    },

    /// Call a tool.
    Call {
        /// Tool name.
        tool: String,

        /// Server to call (defaults to the preferred server offering the tool).
        #[arg(short, long)]
        server: Option<String>,

        /// Arguments as a JSON object.
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Read a resource.
    Read {
        /// Server holding the resource.
        server: String,

        /// Resource URI.
        uri: String,
    },

    /// Render a prompt.
    Prompt {
        /// Server offering the prompt.
        server: String,

        /// Prompt name.
        name: String,

        /// Arguments as a JSON object.
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Manage OAuth authorization.
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Authorize a server interactively.
    Login {
        /// Server name.
        server: String,
    },

    /// Delete a server's cached token.
    Logout {
        /// Server name.
        server: String,
    },

    /// Show token status.
    Status {
        /// Only this server (defaults to every OAuth server).
        server: Option<String>,
    },
}
