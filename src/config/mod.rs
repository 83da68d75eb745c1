//! Configuration management for omni-mcp.
//!
//! Application settings live in `~/.config/omni/mcp/config.toml`. The MCP
//! server list itself is a separate JSON (or TOML) file, by default
//! `servers.json` next to the settings.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::mcp::{AuthManager, ClientInfo, McpConfig, TokenStore};

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server descriptor file (defaults to `<config_dir>/servers.json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers_file: Option<PathBuf>,

    /// OAuth token cache (defaults to `<data_dir>/tokens`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_dir: Option<PathBuf>,

    /// Client name announced during the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file, defaulting when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config in {}", path.display()))
    }

    /// Get the configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the config directory path (`~/.config/omni/mcp/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config_home).join("omni").join("mcp"));
        }

        if cfg!(target_os = "macos") {
            if let Ok(home) = std::env::var("HOME") {
                return Ok(PathBuf::from(home).join(".config").join("omni").join("mcp"));
            }
        }

        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        Ok(base.config_dir().join("omni").join("mcp"))
    }

    /// Get the data directory path (`~/.local/share/omni/mcp/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn data_dir() -> anyhow::Result<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine data directory"))?;

        Ok(base.data_dir().join("omni").join("mcp"))
    }

    /// Token cache directory in effect.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the default cannot
    /// be determined.
    pub fn token_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.token_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("tokens")),
        }
    }

    /// Identity announced to servers
    #[must_use]
    pub fn client_info(&self) -> ClientInfo {
        let mut info = ClientInfo::default();
        if let Some(name) = &self.client_name {
            info.name.clone_from(name);
        }
        info
    }

    /// Load the server descriptors.
    ///
    /// `explicit` (command line or environment) wins over `servers_file`.
    /// Either of those must exist; the implicit default may be absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails validation.
    pub fn load_servers(&self, explicit: Option<&Path>) -> anyhow::Result<McpConfig> {
        let default = Self::config_dir()?.join("servers.json");
        self.load_servers_with_default(explicit, &default)
    }

    fn load_servers_with_default(
        &self,
        explicit: Option<&Path>,
        default: &Path,
    ) -> anyhow::Result<McpConfig> {
        let config = match explicit.or(self.servers_file.as_deref()) {
            Some(path) => McpConfig::load(path),
            None => McpConfig::load_or_default(default),
        };
        Ok(config?)
    }

    /// Load `KEY=value` lines from a `.env` file into the process environment
    /// so `${VAR}` references in server descriptors can resolve them.
    ///
    /// With no `explicit` path, `.env` is searched for from the working
    /// directory upwards and may be absent. Variables already set win.
    /// Returns the file that was loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or if a file cannot
    /// be read or parsed.
    pub fn load_env_file(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
        let loaded = match explicit {
            Some(path) => dotenvy::from_path(path)
                .map(|()| path.to_path_buf())
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => match dotenvy::dotenv() {
                Ok(path) => path,
                Err(e) if e.not_found() => return Ok(None),
                Err(e) => return Err(e).context("failed to load .env"),
            },
        };
        tracing::debug!(path = %loaded.display(), "loaded environment file");
        Ok(Some(loaded))
    }

    /// Authentication manager backed by the configured token cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the token directory cannot be determined.
    pub fn auth_manager(&self) -> anyhow::Result<AuthManager> {
        Ok(AuthManager::new(TokenStore::with_root(self.token_dir()?)))
    }
}
