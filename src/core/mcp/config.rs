//! MCP server descriptors and their loader
//!
//! The servers file is JSON (or TOML, chosen by extension) with a `servers`
//! list. `${VAR}` references in any string are substituted before
//! validation, and a single invalid entry rejects the whole file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::auth::{AuthConfig, AuthConfigError, DEFAULT_REDIRECT_URI, OAuthConfig};
use super::env;
use super::retry::RetryPolicy;

/// Default request timeout when a descriptor sets none
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML in config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("server configuration missing required field: name")]
    MissingName,

    #[error("server '{server}' missing required field: {field}")]
    MissingField { server: String, field: &'static str },

    #[error("invalid transport '{value}' for server '{server}'; valid transports are: local-process, http, sse")]
    InvalidTransport { server: String, value: String },

    #[error("duplicate server name '{0}'")]
    DuplicateName(String),

    #[error("environment variable '{name}' not found and no default provided")]
    UnresolvedVariable { name: String },

    #[error("invalid {field} for server '{server}': {reason}")]
    InvalidValue {
        server: String,
        field: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Auth(#[from] AuthConfigError),
}

/// Transport kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    LocalProcess,
    Http,
    Sse,
}

impl TransportKind {
    /// Parse a config value; `stdio` is accepted for local processes
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local-process" | "local_process" | "stdio" => Some(Self::LocalProcess),
            "http" | "streamable-http" => Some(Self::Http),
            "sse" => Some(Self::Sse),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalProcess => "local-process",
            Self::Http => "http",
            Self::Sse => "sse",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-specific settings
#[derive(Clone, PartialEq, Eq)]
pub enum TransportConfig {
    LocalProcess {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        cwd: Option<PathBuf>,
    },
    Http {
        url: Url,
        headers: BTreeMap<String, String>,
    },
    Sse {
        url: Url,
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::LocalProcess { .. } => TransportKind::LocalProcess,
            Self::Http { .. } => TransportKind::Http,
            Self::Sse { .. } => TransportKind::Sse,
        }
    }

    /// Command line or URL, for display
    #[must_use]
    pub fn endpoint(&self) -> String {
        match self {
            Self::LocalProcess { command, args, .. } => {
                std::iter::once(command.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Self::Http { url, .. } | Self::Sse { url, .. } => url.to_string(),
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |map: &BTreeMap<String, String>| -> Vec<String> {
            map.keys().map(|k| format!("{k}=<redacted>")).collect()
        };
        match self {
            Self::LocalProcess {
                command,
                args,
                env,
                cwd,
            } => f
                .debug_struct("LocalProcess")
                .field("command", command)
                .field("args", args)
                .field("env", &redact(env))
                .field("cwd", cwd)
                .finish(),
            Self::Http { url, headers } => f
                .debug_struct("Http")
                .field("url", &url.as_str())
                .field("headers", &redact(headers))
                .finish(),
            Self::Sse { url, headers } => f
                .debug_struct("Sse")
                .field("url", &url.as_str())
                .field("headers", &redact(headers))
                .finish(),
        }
    }
}

/// One configured server
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: TransportConfig,
    /// Lower is preferred
    pub priority: i64,
    pub retry: RetryPolicy,
    pub auth: AuthConfig,
    /// Upper bound on waiting for any single response
    pub request_timeout: Duration,
}

impl ServerDescriptor {
    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            priority: 1,
            retry: RetryPolicy::default(),
            auth: AuthConfig::None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Create a local-process server
    #[must_use]
    pub fn local_process(
        name: impl Into<String>,
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::with_transport(
            name,
            TransportConfig::LocalProcess {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: BTreeMap::new(),
                cwd: None,
            },
        )
    }

    /// Create a streamable HTTP server
    #[must_use]
    pub fn http(name: impl Into<String>, url: Url) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Http {
                url,
                headers: BTreeMap::new(),
            },
        )
    }

    /// Create a legacy SSE server
    #[must_use]
    pub fn sse(name: impl Into<String>, url: Url) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Sse {
                url,
                headers: BTreeMap::new(),
            },
        )
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set environment variables (local-process only)
    #[must_use]
    pub fn with_env(mut self, vars: BTreeMap<String, String>) -> Self {
        if let TransportConfig::LocalProcess { env, .. } = &mut self.transport {
            *env = vars;
        }
        self
    }

    /// Add a request header (http and sse only)
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Http { headers, .. } | TransportConfig::Sse { headers, .. } =
            &mut self.transport
        {
            headers.insert(name.into(), value.into());
        }
        self
    }

    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.transport.kind()
    }
}

/// Validated, ordered set of server descriptors
#[derive(Debug, Clone, Default)]
pub struct McpConfig {
    servers: Vec<ServerDescriptor>,
}

impl McpConfig {
    /// Load from a file; `.toml` selects TOML, anything else JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml_str(&contents)?
        } else {
            Self::from_json_str(&contents)?
        };

        tracing::debug!(path = %path.display(), servers = config.servers.len(), "loaded MCP config");
        Ok(config)
    }

    /// Load from a file, treating a missing file as an empty configuration.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no MCP config file, no servers configured");
            Ok(Self::default())
        }
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_value(serde_json::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let value: Value = toml::from_str(contents)?;
        Self::from_value(value)
    }

    /// Substitute from the process environment, then validate.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Self::from_value_with(value, &|name| std::env::var(name).ok())
    }

    /// Substitute with a custom variable lookup, then validate.
    pub fn from_value_with(
        mut value: Value,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        env::substitute_value(&mut value, lookup)?;

        let raw: RawConfig = serde_json::from_value(value)?;
        let servers = raw
            .servers
            .into_iter()
            .map(RawServer::into_descriptor)
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_descriptors(servers)
    }

    /// Build from descriptors, rejecting duplicate names.
    pub fn from_descriptors(servers: Vec<ServerDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for server in &servers {
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateName(server.name.clone()));
            }
        }
        Ok(Self { servers })
    }

    /// Servers in declaration order
    #[must_use]
    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Declaration index of a server
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.servers.iter().position(|s| s.name == name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    servers: Vec<RawServer>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

#[derive(Deserialize)]
struct RawServer {
    name: Option<String>,
    transport: Option<String>,
    command: Option<CommandSpec>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    priority: Option<i64>,
    retry: Option<RawRetry>,
    auth: Option<RawAuth>,
    /// Seconds
    timeout: Option<f64>,
}

#[derive(Deserialize)]
struct RawRetry {
    max_attempts: Option<u32>,
    initial_delay: Option<f64>,
    max_delay: Option<f64>,
    #[serde(alias = "backoff_base")]
    exponential_base: Option<f64>,
    jitter: Option<bool>,
}

#[derive(Deserialize)]
struct RawAuth {
    #[serde(rename = "type")]
    kind: String,
    username: Option<String>,
    password: Option<String>,
    authorization_url: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    scope: Option<String>,
    redirect_uri: Option<String>,
}

impl RawServer {
    fn into_descriptor(self) -> Result<ServerDescriptor, ConfigError> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(ConfigError::MissingName)?;

        let transport_value = self.transport.ok_or_else(|| ConfigError::MissingField {
            server: name.clone(),
            field: "transport",
        })?;
        let kind =
            TransportKind::parse(&transport_value).ok_or_else(|| ConfigError::InvalidTransport {
                server: name.clone(),
                value: transport_value,
            })?;

        let transport = match kind {
            TransportKind::LocalProcess => {
                let missing = || ConfigError::MissingField {
                    server: name.clone(),
                    field: "command",
                };
                let (command, mut args) = match self.command.ok_or_else(missing)? {
                    CommandSpec::Line(command) => (command, Vec::new()),
                    CommandSpec::Argv(mut argv) => {
                        if argv.is_empty() {
                            return Err(missing());
                        }
                        let command = argv.remove(0);
                        (command, argv)
                    }
                };
                if command.trim().is_empty() {
                    return Err(missing());
                }
                args.extend(self.args);
                TransportConfig::LocalProcess {
                    command,
                    args,
                    env: self.env,
                    cwd: self.cwd,
                }
            }
            TransportKind::Http | TransportKind::Sse => {
                let raw_url = self.url.ok_or_else(|| ConfigError::MissingField {
                    server: name.clone(),
                    field: "url",
                })?;
                let url = parse_http_url(&name, "url", &raw_url)?;
                validate_headers(&name, &self.headers)?;
                if kind == TransportKind::Http {
                    TransportConfig::Http {
                        url,
                        headers: self.headers,
                    }
                } else {
                    TransportConfig::Sse {
                        url,
                        headers: self.headers,
                    }
                }
            }
        };

        let retry = match self.retry {
            Some(raw) => raw.into_policy(&name)?,
            None => RetryPolicy::default(),
        };

        let auth = match self.auth {
            Some(raw) => raw.into_config(&name)?,
            None => AuthConfig::None,
        };

        let request_timeout = match self.timeout {
            Some(secs) => seconds(&name, "timeout", secs)?,
            None => DEFAULT_REQUEST_TIMEOUT,
        };
        if request_timeout.is_zero() {
            return Err(invalid(&name, "timeout", "must be greater than zero"));
        }

        Ok(ServerDescriptor {
            name,
            transport,
            priority: self.priority.unwrap_or(1),
            retry,
            auth,
            request_timeout,
        })
    }
}

impl RawRetry {
    fn into_policy(self, server: &str) -> Result<RetryPolicy, ConfigError> {
        let defaults = RetryPolicy::default();

        let max_attempts = self.max_attempts.unwrap_or(defaults.max_attempts);
        if max_attempts < 1 {
            return Err(invalid(server, "retry.max_attempts", "must be at least 1"));
        }

        let initial_delay = match self.initial_delay {
            Some(secs) => seconds(server, "retry.initial_delay", secs)?,
            None => defaults.initial_delay,
        };
        let max_delay = match self.max_delay {
            Some(secs) => seconds(server, "retry.max_delay", secs)?,
            None => defaults.max_delay,
        };

        let backoff_base = self.exponential_base.unwrap_or(defaults.backoff_base);
        if !backoff_base.is_finite() || backoff_base < 1.0 {
            return Err(invalid(
                server,
                "retry.exponential_base",
                "must be a finite number of at least 1.0",
            ));
        }

        Ok(RetryPolicy {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_base,
            jitter: self.jitter.unwrap_or(defaults.jitter),
        })
    }
}

impl RawAuth {
    fn into_config(self, server: &str) -> Result<AuthConfig, ConfigError> {
        match self.kind.to_ascii_lowercase().as_str() {
            "none" => Ok(AuthConfig::None),
            "basic" => {
                let missing = |field| AuthConfigError::MissingCredential {
                    server: server.to_string(),
                    field,
                };
                let username = self.username.ok_or_else(|| missing("username"))?;
                let password = self.password.ok_or_else(|| missing("password"))?;
                Ok(AuthConfig::Basic { username, password })
            }
            "oauth" | "oauth2" => {
                let mut fields = Vec::new();
                if self.authorization_url.is_none() {
                    fields.push("authorization_url");
                }
                if self.token_url.is_none() {
                    fields.push("token_url");
                }
                if self.client_id.is_none() {
                    fields.push("client_id");
                }

                let (Some(authorization_url), Some(token_url), Some(client_id)) =
                    (self.authorization_url, self.token_url, self.client_id)
                else {
                    return Err(AuthConfigError::MissingFields {
                        server: server.to_string(),
                        fields,
                    }
                    .into());
                };

                let url = |field: &'static str, value: &str| {
                    Url::parse(value).map_err(|e| AuthConfigError::InvalidUrl {
                        server: server.to_string(),
                        field,
                        reason: e.to_string(),
                    })
                };

                Ok(AuthConfig::OAuth(OAuthConfig {
                    authorization_url: url("authorization_url", &authorization_url)?,
                    token_url: url("token_url", &token_url)?,
                    client_id,
                    client_secret: self.client_secret.filter(|s| !s.is_empty()),
                    scope: self.scope.filter(|s| !s.is_empty()),
                    redirect_uri: self
                        .redirect_uri
                        .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
                }))
            }
            other => Err(AuthConfigError::UnsupportedType {
                server: server.to_string(),
                value: other.to_string(),
            }
            .into()),
        }
    }
}

fn invalid(server: &str, field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        server: server.to_string(),
        field,
        reason: reason.into(),
    }
}

fn seconds(server: &str, field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid(server, field, "must be a non-negative number of seconds"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(server, field, e.to_string()))
}

fn parse_http_url(server: &str, field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(server, field, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            server,
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

fn validate_headers(server: &str, headers: &BTreeMap<String, String>) -> Result<(), ConfigError> {
    for (name, value) in headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| invalid(server, "headers", format!("invalid header name '{name}'")))?;
        HeaderValue::from_str(value)
            .map_err(|_| invalid(server, "headers", format!("invalid value for header '{name}'")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn load(doc: Value) -> Result<McpConfig, ConfigError> {
        McpConfig::from_value_with(doc, &no_env)
    }

    #[test]
    fn loads_all_transports_in_order() {
        let config = load(json!({
            "servers": [
                {"name": "fs", "transport": "stdio", "command": ["python", "server.py"], "args": ["--root", "/tmp"]},
                {"name": "remote", "transport": "http", "url": "https://mcp.example.com/mcp", "priority": 2},
                {"name": "legacy", "transport": "sse", "url": "http://localhost:9000/sse"}
            ]
        }))
        .unwrap();

        let names: Vec<_> = config.servers().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["fs", "remote", "legacy"]);

        let fs = config.get("fs").unwrap();
        assert_eq!(fs.kind(), TransportKind::LocalProcess);
        assert_eq!(fs.priority, 1);
        assert_eq!(fs.transport.endpoint(), "python server.py --root /tmp");

        assert_eq!(config.get("remote").unwrap().priority, 2);
        assert_eq!(config.get("legacy").unwrap().kind(), TransportKind::Sse);
        assert_eq!(config.position("legacy"), Some(2));
    }

    #[test]
    fn command_may_be_a_string() {
        let config = load(json!({
            "servers": [{"name": "s", "transport": "local-process", "command": "mcp-server", "args": ["-v"]}]
        }))
        .unwrap();
        match &config.servers()[0].transport {
            TransportConfig::LocalProcess { command, args, .. } => {
                assert_eq!(command, "mcp-server");
                assert_eq!(args, &["-v"]);
            }
            other => panic!("unexpected transport: {other:?}"),
        }
    }

    #[test]
    fn missing_transport_fields_are_rejected() {
        let err = load(json!({"servers": [{"name": "s", "transport": "stdio"}]})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "command", .. }));

        let err = load(json!({"servers": [{"name": "s", "transport": "http"}]})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "url", .. }));

        let err = load(json!({"servers": [{"transport": "http", "url": "http://x"}]})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingName));
    }

    #[test]
    fn one_bad_entry_rejects_everything() {
        let err = load(json!({
            "servers": [
                {"name": "good", "transport": "stdio", "command": ["ok"]},
                {"name": "bad", "transport": "websocket", "url": "ws://x"}
            ]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("websocket"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = load(json!({
            "servers": [
                {"name": "dup", "transport": "stdio", "command": ["a"]},
                {"name": "dup", "transport": "stdio", "command": ["b"]}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(ref n) if n == "dup"));
    }

    #[test]
    fn retry_policy_defaults_and_overrides() {
        let config = load(json!({
            "servers": [
                {"name": "a", "transport": "stdio", "command": ["a"]},
                {"name": "b", "transport": "stdio", "command": ["b"],
                 "retry": {"max_attempts": 5, "initial_delay": 1.5, "max_delay": 120.0, "jitter": false}}
            ]
        }))
        .unwrap();

        assert_eq!(config.get("a").unwrap().retry, RetryPolicy::default());

        let b = &config.get("b").unwrap().retry;
        assert_eq!(b.max_attempts, 5);
        assert_eq!(b.initial_delay, Duration::from_millis(1500));
        assert_eq!(b.max_delay, Duration::from_secs(120));
        assert!((b.backoff_base - 2.0).abs() < f64::EPSILON);
        assert!(!b.jitter);
    }

    #[test]
    fn invalid_retry_values_are_rejected() {
        for retry in [
            json!({"max_attempts": 0}),
            json!({"initial_delay": -1.0}),
            json!({"exponential_base": 0.5}),
        ] {
            let err = load(json!({
                "servers": [{"name": "r", "transport": "stdio", "command": ["r"], "retry": retry}]
            }))
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{err}");
        }
    }

    #[test]
    fn oauth_missing_fields_are_all_named() {
        let err = load(json!({
            "servers": [{
                "name": "secure", "transport": "http", "url": "https://mcp.example.com",
                "auth": {"type": "oauth", "authorization_url": "https://auth.example.com/authorize"}
            }]
        }))
        .unwrap_err();

        match err {
            ConfigError::Auth(AuthConfigError::MissingFields { server, fields }) => {
                assert_eq!(server, "secure");
                assert_eq!(fields, ["token_url", "client_id"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn oauth_defaults_redirect_and_keeps_optional_scope() {
        let config = load(json!({
            "servers": [{
                "name": "secure", "transport": "http", "url": "https://mcp.example.com",
                "auth": {
                    "type": "oauth",
                    "authorization_url": "https://auth.example.com/authorize",
                    "token_url": "https://auth.example.com/token",
                    "client_id": "abc"
                }
            }]
        }))
        .unwrap();

        let AuthConfig::OAuth(oauth) = &config.servers()[0].auth else {
            panic!("expected oauth");
        };
        assert_eq!(oauth.redirect_uri, DEFAULT_REDIRECT_URI);
        assert!(oauth.scope.is_none());
        assert!(oauth.client_secret.is_none());
    }

    #[test]
    fn basic_auth_requires_both_credentials() {
        let err = load(json!({
            "servers": [{
                "name": "b", "transport": "http", "url": "https://x.example.com",
                "auth": {"type": "basic", "username": "u"}
            }]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn substitutes_everywhere_before_validation() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("HOST", "api.example.com"),
            ("TOKEN", "t0k3n"),
            ("PY", "/usr/bin/python3"),
        ]);
        let lookup = |name: &str| vars.get(name).map(|v| (*v).to_string());

        let config = McpConfig::from_value_with(
            json!({
                "servers": [
                    {"name": "h", "transport": "http", "url": "https://${HOST}/mcp",
                     "headers": {"Authorization": "Bearer ${TOKEN}"}},
                    {"name": "p", "transport": "stdio", "command": ["${PY}", "server.py"],
                     "env": {"DEBUG": "${DEBUG:-false}"}}
                ]
            }),
            &lookup,
        )
        .unwrap();

        match &config.get("h").unwrap().transport {
            TransportConfig::Http { url, headers } => {
                assert_eq!(url.as_str(), "https://api.example.com/mcp");
                assert_eq!(headers["Authorization"], "Bearer t0k3n");
            }
            other => panic!("unexpected transport: {other:?}"),
        }
        match &config.get("p").unwrap().transport {
            TransportConfig::LocalProcess { command, env, .. } => {
                assert_eq!(command, "/usr/bin/python3");
                assert_eq!(env["DEBUG"], "false");
            }
            other => panic!("unexpected transport: {other:?}"),
        }
    }

    #[test]
    fn unresolved_variable_rejects_load() {
        let err = load(json!({
            "servers": [{"name": "s", "transport": "stdio", "command": ["x"], "env": {"KEY": "${MISSING_VAR}"}}]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedVariable { ref name } if name == "MISSING_VAR"));
    }

    #[test]
    fn toml_documents_are_accepted() {
        let config = McpConfig::from_toml_str(
            r#"
            [[servers]]
            name = "calc"
            transport = "stdio"
            command = ["calc-server"]
            priority = 3

            [servers.retry]
            max_attempts = 2
            "#,
        )
        .unwrap();
        let calc = config.get("calc").unwrap();
        assert_eq!(calc.priority, 3);
        assert_eq!(calc.retry.max_attempts, 2);
    }

    #[test]
    fn load_reads_files_and_missing_default_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("servers.json");

        assert!(McpConfig::load(&path).is_err());
        assert!(McpConfig::load_or_default(&path).unwrap().is_empty());

        std::fs::write(
            &path,
            r#"{"servers": [{"name": "s", "transport": "stdio", "command": ["s"]}]}"#,
        )
        .unwrap();
        assert_eq!(McpConfig::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn debug_redacts_headers_and_env() {
        let descriptor = ServerDescriptor::http("h", Url::parse("https://x.example.com").unwrap())
            .with_header("Authorization", "Bearer secret-value");
        assert!(!format!("{descriptor:?}").contains("secret-value"));
    }
}
