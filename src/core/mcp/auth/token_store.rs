//! On-disk OAuth token cache, one JSON file per server

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Tokens this close to expiry are treated as expired
const EXPIRY_LEEWAY_SECS: i64 = 30;

const SLUG_MAX_CHARS: usize = 40;

/// Token store errors
#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("token store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize token: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted OAuth token for one server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Absolute expiry, stored as epoch seconds
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenRecord {
    /// Token without expiry or refresh token
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_at: None,
            refresh_token: None,
            scope: None,
        }
    }

    /// Expire `seconds` from now
    #[must_use]
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.expires_at =
            Duration::try_seconds(seconds).and_then(|d| Utc::now().checked_add_signed(d));
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Whether the token is expired, or expires within the leeway.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at <= Utc::now() + Duration::seconds(EXPIRY_LEEWAY_SECS))
    }

    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token cache rooted at a directory
#[derive(Debug, Clone)]
pub struct TokenStore {
    root: PathBuf,
}

impl TokenStore {
    #[must_use]
    pub const fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Token file for a server.
    ///
    /// A readable slug of the name plus the SHA-256 of the exact name, so two
    /// distinct server names never share a file.
    #[must_use]
    pub fn path(&self, server: &str) -> PathBuf {
        let slug: String = server
            .chars()
            .take(SLUG_MAX_CHARS)
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let digest = hex::encode(Sha256::digest(server.as_bytes()));
        self.root.join(format!("{slug}-{digest}.json"))
    }

    /// Load a server's token.
    ///
    /// A missing file is `None`. So is a corrupt one, which is logged and
    /// otherwise ignored so the caller re-authorizes.
    pub async fn load(&self, server: &str) -> Result<Option<TokenRecord>, TokenStoreError> {
        let path = self.path(server);

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(TokenStoreError::Io { path, source }),
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(server = %server, path = %path.display(), error = %e, "ignoring unreadable token file");
                Ok(None)
            }
        }
    }

    /// Persist a server's token atomically with owner-only permissions.
    pub async fn save(&self, server: &str, record: &TokenRecord) -> Result<(), TokenStoreError> {
        let path = self.path(server);
        let json = serde_json::to_vec_pretty(record)?;

        self.ensure_root().await?;

        let tmp = path.with_extension("json.tmp");
        let io = |source: std::io::Error| TokenStoreError::Io {
            path: tmp.clone(),
            source,
        };

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await.map_err(io)?;
        file.write_all(&json).await.map_err(io)?;
        file.sync_all().await.map_err(io)?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| TokenStoreError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(server = %server, path = %path.display(), "saved token");
        Ok(())
    }

    /// Delete a server's token. Missing files are fine.
    pub async fn remove(&self, server: &str) -> Result<(), TokenStoreError> {
        let path = self.path(server);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TokenStoreError::Io { path, source }),
        }
    }

    async fn ensure_root(&self) -> Result<(), TokenStoreError> {
        let io = |source: std::io::Error| TokenStoreError::Io {
            path: self.root.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.root).await.map_err(io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(io)?;
        }

        Ok(())
    }
}
