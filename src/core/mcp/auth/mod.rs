//! Server authentication: basic credentials and OAuth2 with PKCE
//!
//! [`AuthManager`] turns a server's [`AuthConfig`] into request headers. For
//! OAuth servers it serves cached tokens, refreshes expired ones and, when no
//! usable token exists, either runs an injected [`AuthorizationHandler`] or
//! reports that authorization is required.

pub mod oauth;
pub mod pkce;
pub mod token_store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use thiserror::Error;
use url::Url;

use self::pkce::PkceChallenge;
pub use self::oauth::OAuthError;
pub use self::token_store::{TokenRecord, TokenStore, TokenStoreError};
use super::config::ServerDescriptor;

/// Redirect URI used when a descriptor does not set one
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";

/// How a server expects clients to authenticate
#[derive(Clone, Default)]
pub enum AuthConfig {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    OAuth(OAuthConfig),
}

impl AuthConfig {
    /// Short name used in listings and logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::OAuth(_) => "oauth",
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::OAuth(config) => f.debug_tuple("OAuth").field(config).finish(),
        }
    }
}

/// OAuth2 authorization-code client settings. PKCE is always used.
#[derive(Clone)]
pub struct OAuthConfig {
    pub authorization_url: Url,
    pub token_url: Url,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub redirect_uri: String,
}

impl OAuthConfig {
    #[must_use]
    pub fn new(authorization_url: Url, token_url: Url, client_id: impl Into<String>) -> Self {
        Self {
            authorization_url,
            token_url,
            client_id: client_id.into(),
            client_secret: None,
            scope: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
        }
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("authorization_url", &self.authorization_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("scope", &self.scope)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Invalid authentication settings in a server descriptor
#[derive(Debug, Error)]
pub enum AuthConfigError {
    #[error(
        "OAuth configuration for server '{server}' missing required fields: {}",
        fields.join(", ")
    )]
    MissingFields {
        server: String,
        fields: Vec<&'static str>,
    },

    #[error("basic auth for server '{server}' missing required field: {field}")]
    MissingCredential { server: String, field: &'static str },

    #[error("invalid {field} for server '{server}': {reason}")]
    InvalidUrl {
        server: String,
        field: &'static str,
        reason: String,
    },

    #[error("unsupported auth type '{value}' for server '{server}'")]
    UnsupportedType { server: String, value: String },
}

/// Failures while producing credentials
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] AuthConfigError),

    /// Interactive flow failed before reaching the token endpoint
    #[error("authorization for server '{server}' failed: {reason}")]
    Authorization { server: String, reason: String },

    /// Token endpoint rejected the authorization code
    #[error("code exchange for server '{server}' failed: {source}")]
    Exchange {
        server: String,
        #[source]
        source: OAuthError,
    },

    /// Refresh was rejected; re-authorizing recovers
    #[error("token refresh for server '{server}' failed: {source}")]
    Refresh {
        server: String,
        #[source]
        source: OAuthError,
    },

    #[error("server '{server}' requires authorization; run `omni-mcp auth login {server}`")]
    AuthorizationRequired { server: String },

    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),
}

impl AuthError {
    fn authorization(server: &str, reason: impl Into<String>) -> Self {
        Self::Authorization {
            server: server.to_string(),
            reason: reason.into(),
        }
    }
}

/// Headers to attach to every outbound request for one server
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    headers: HeaderMap,
}

impl Credentials {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn basic(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Self::authorization(&format!("Basic {encoded}"))
    }

    #[must_use]
    pub fn bearer(token: &TokenRecord) -> Self {
        let scheme = if token.token_type.eq_ignore_ascii_case("bearer") {
            "Bearer"
        } else {
            token.token_type.as_str()
        };
        Self::authorization(&format!("{scheme} {}", token.access_token))
    }

    fn authorization(value: &str) -> Self {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(value) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("credential contains characters not allowed in a header"),
        }
        Self { headers }
    }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Per-server authentication state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authorizing,
    Authenticated,
    Expired,
    Refreshing,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authorizing => "authorizing",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
            Self::Refreshing => "refreshing",
        })
    }
}

/// URL the user must visit, and the state value the callback must echo
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub server: String,
    pub url: Url,
    pub state: String,
}

/// What the authorization server sent back to the redirect URI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl AuthorizationResponse {
    /// Successful response carrying a code and the echoed state
    #[must_use]
    pub fn code(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    /// Parse the full callback URL the browser was redirected to.
    pub fn from_redirect_url(input: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(input.trim())?;
        let mut response = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "code" => &mut response.code,
                "state" => &mut response.state,
                "error" => &mut response.error,
                "error_description" => &mut response.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        Ok(response)
    }
}

/// Drives the user-facing part of the authorization-code flow
#[async_trait]
pub trait AuthorizationHandler: Send + Sync {
    /// Show `request.url` to the user and return the callback parameters.
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, AuthError>;
}

struct PendingAuthorization {
    state: String,
    pkce: PkceChallenge,
}

/// Credential provider shared by every session
pub struct AuthManager {
    store: TokenStore,
    http: reqwest::Client,
    handler: Option<Arc<dyn AuthorizationHandler>>,
    states: RwLock<HashMap<String, AuthState>>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
    flows: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AuthManager {
    #[must_use]
    pub fn new(store: TokenStore) -> Self {
        Self {
            store,
            http: super::transport::http_client(),
            handler: None,
            states: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Install an interactive handler used when no usable token exists
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn AuthorizationHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub const fn store(&self) -> &TokenStore {
        &self.store
    }

    #[must_use]
    pub fn state(&self, server: &str) -> AuthState {
        self.states.read().get(server).copied().unwrap_or_default()
    }

    fn set_state(&self, server: &str, state: AuthState) {
        tracing::debug!(server = %server, state = %state, "auth state");
        self.states.write().insert(server.to_string(), state);
    }

    fn flow_lock(&self, server: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.flows.lock().entry(server.to_string()).or_default())
    }

    /// Produce request headers for a server.
    pub async fn credentials(&self, descriptor: &ServerDescriptor) -> Result<Credentials, AuthError> {
        match &descriptor.auth {
            AuthConfig::None => Ok(Credentials::none()),
            AuthConfig::Basic { username, password } => Ok(Credentials::basic(username, password)),
            AuthConfig::OAuth(config) => self.oauth_credentials(&descriptor.name, config).await,
        }
    }

    async fn oauth_credentials(
        &self,
        server: &str,
        config: &OAuthConfig,
    ) -> Result<Credentials, AuthError> {
        // One token decision per server at a time, so an expired token is
        // refreshed once even when several sessions open concurrently
        let lock = self.flow_lock(server);
        let _guard = lock.lock().await;

        match self.store.load(server).await? {
            Some(token) if !token.is_expired() => {
                self.set_state(server, AuthState::Authenticated);
                Ok(Credentials::bearer(&token))
            }
            Some(token) if token.can_refresh() => {
                self.set_state(server, AuthState::Expired);
                self.refresh(server, config, token).await
            }
            stale => {
                if stale.is_some() {
                    tracing::info!(server = %server, "token expired and cannot be refreshed");
                }
                self.set_state(server, AuthState::Unauthenticated);
                self.authorize_interactively(server, config).await
            }
        }
    }

    async fn refresh(
        &self,
        server: &str,
        config: &OAuthConfig,
        token: TokenRecord,
    ) -> Result<Credentials, AuthError> {
        self.set_state(server, AuthState::Refreshing);
        let refresh = token.refresh_token.unwrap_or_default();

        match oauth::refresh_token(&self.http, config, &refresh).await {
            Ok(response) => {
                let record = response.into_record(Some(refresh));
                self.store.save(server, &record).await?;
                self.set_state(server, AuthState::Authenticated);
                tracing::info!(server = %server, "refreshed access token");
                Ok(Credentials::bearer(&record))
            }
            Err(source) => {
                tracing::warn!(server = %server, error = %source, "token refresh failed");
                self.store.remove(server).await?;
                self.set_state(server, AuthState::Unauthenticated);
                Err(AuthError::Refresh {
                    server: server.to_string(),
                    source,
                })
            }
        }
    }

    async fn authorize_interactively(
        &self,
        server: &str,
        config: &OAuthConfig,
    ) -> Result<Credentials, AuthError> {
        let Some(handler) = self.handler.clone() else {
            return Err(AuthError::AuthorizationRequired {
                server: server.to_string(),
            });
        };

        let request = self.start(server, config);
        let response = match handler.authorize(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.pending.lock().remove(server);
                self.set_state(server, AuthState::Unauthenticated);
                return Err(e);
            }
        };

        let token = self.finish(server, config, response).await?;
        Ok(Credentials::bearer(&token))
    }

    /// Start an authorization-code flow and return the URL to visit.
    ///
    /// Replaces any flow already pending for the server.
    pub fn begin_authorization(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<AuthorizationRequest, AuthError> {
        let config = oauth_config(descriptor)?;
        Ok(self.start(&descriptor.name, config))
    }

    fn start(&self, server: &str, config: &OAuthConfig) -> AuthorizationRequest {
        let pkce = PkceChallenge::generate();
        let state = pkce::generate_state();
        let url = oauth::authorization_url(config, &state, &pkce);

        self.pending.lock().insert(
            server.to_string(),
            PendingAuthorization {
                state: state.clone(),
                pkce,
            },
        );
        self.set_state(server, AuthState::Authorizing);
        tracing::info!(server = %server, "authorization started");

        AuthorizationRequest {
            server: server.to_string(),
            url,
            state,
        }
    }

    /// Finish a pending flow: check state, exchange the code, persist the token.
    pub async fn complete_authorization(
        &self,
        descriptor: &ServerDescriptor,
        response: AuthorizationResponse,
    ) -> Result<TokenRecord, AuthError> {
        let config = oauth_config(descriptor)?;
        self.finish(&descriptor.name, config, response).await
    }

    async fn finish(
        &self,
        server: &str,
        config: &OAuthConfig,
        response: AuthorizationResponse,
    ) -> Result<TokenRecord, AuthError> {
        let result = self.exchange(server, config, response).await;
        match &result {
            Ok(_) => {
                self.set_state(server, AuthState::Authenticated);
                tracing::info!(server = %server, "authorization complete");
            }
            Err(e) => {
                self.set_state(server, AuthState::Unauthenticated);
                tracing::warn!(server = %server, error = %e, "authorization failed");
            }
        }
        result
    }

    async fn exchange(
        &self,
        server: &str,
        config: &OAuthConfig,
        response: AuthorizationResponse,
    ) -> Result<TokenRecord, AuthError> {
        let pending = self
            .pending
            .lock()
            .remove(server)
            .ok_or_else(|| AuthError::authorization(server, "no authorization in progress"))?;

        if let Some(error) = response.error {
            let reason = match response.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            return Err(AuthError::authorization(server, reason));
        }

        if response.state.as_deref() != Some(pending.state.as_str()) {
            return Err(AuthError::authorization(server, "state mismatch"));
        }

        let code = response
            .code
            .ok_or_else(|| AuthError::authorization(server, "callback did not include a code"))?;

        let token = oauth::exchange_code(&self.http, config, &code, pending.pkce.verifier())
            .await
            .map_err(|source| AuthError::Exchange {
                server: server.to_string(),
                source,
            })?
            .into_record(None);

        self.store.save(server, &token).await?;
        Ok(token)
    }

    /// Cached token for a server, if any
    pub async fn token(&self, server: &str) -> Result<Option<TokenRecord>, AuthError> {
        Ok(self.store.load(server).await?)
    }

    /// Forget a server's token and any pending flow.
    pub async fn logout(&self, server: &str) -> Result<(), AuthError> {
        self.pending.lock().remove(server);
        self.store.remove(server).await?;
        self.set_state(server, AuthState::Unauthenticated);
        tracing::info!(server = %server, "logged out");
        Ok(())
    }
}

fn oauth_config(descriptor: &ServerDescriptor) -> Result<&OAuthConfig, AuthError> {
    match &descriptor.auth {
        AuthConfig::OAuth(config) => Ok(config),
        other => Err(AuthError::authorization(
            &descriptor.name,
            format!("server uses {} authentication, not oauth", other.kind()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn oauth_descriptor(token_url: &str) -> ServerDescriptor {
        ServerDescriptor::http("secure", Url::parse("http://127.0.0.1:1/mcp").unwrap()).with_auth(
            AuthConfig::OAuth(OAuthConfig::new(
                Url::parse("https://auth.example.com/authorize").unwrap(),
                Url::parse(token_url).unwrap(),
                "client-1",
            )),
        )
    }

    fn manager() -> (TempDir, AuthManager) {
        let dir = TempDir::new().unwrap();
        let manager = AuthManager::new(TokenStore::with_root(dir.path().to_path_buf()));
        (dir, manager)
    }

    #[test]
    fn parses_redirect_url() {
        let response = AuthorizationResponse::from_redirect_url(
            "http://localhost:8080/callback?code=abc%20123&state=xyz",
        )
        .unwrap();
        assert_eq!(response, AuthorizationResponse::code("abc 123", "xyz"));

        let denied = AuthorizationResponse::from_redirect_url(
            "http://localhost:8080/callback?error=access_denied&error_description=User+said+no",
        )
        .unwrap();
        assert_eq!(denied.error.as_deref(), Some("access_denied"));
        assert_eq!(denied.error_description.as_deref(), Some("User said no"));
        assert!(denied.code.is_none());
    }

    #[test]
    fn basic_credentials_are_encoded_and_sensitive() {
        let creds = Credentials::basic("user", "password");
        let value = creds.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(value.to_str().unwrap(), "Basic dXNlcjpwYXNzd29yZA==");
        assert!(value.is_sensitive());
        assert!(!format!("{creds:?}").contains("dXNlcjpwYXNzd29yZA"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let basic = AuthConfig::Basic {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{basic:?}").contains("hunter2"));

        let oauth = AuthConfig::OAuth(
            OAuthConfig::new(
                Url::parse("https://a.example.com").unwrap(),
                Url::parse("https://t.example.com").unwrap(),
                "id",
            )
            .with_client_secret("top-secret"),
        );
        assert!(!format!("{oauth:?}").contains("top-secret"));
    }

    #[tokio::test]
    async fn cached_token_is_used_without_network() {
        let (_dir, manager) = manager();
        let descriptor = oauth_descriptor("http://127.0.0.1:1/token");
        manager
            .store()
            .save("secure", &TokenRecord::new("cached").expires_in(3600))
            .await
            .unwrap();

        let creds = manager.credentials(&descriptor).await.unwrap();
        assert_eq!(
            creds.headers().get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer cached"
        );
        assert_eq!(manager.state("secure"), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn missing_token_without_handler_requires_authorization() {
        let (_dir, manager) = manager();
        let err = manager
            .credentials(&oauth_descriptor("http://127.0.0.1:1/token"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::AuthorizationRequired { .. }));
        assert_eq!(manager.state("secure"), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected() {
        let (_dir, manager) = manager();
        let descriptor = oauth_descriptor("http://127.0.0.1:1/token");

        let request = manager.begin_authorization(&descriptor).unwrap();
        assert_eq!(manager.state("secure"), AuthState::Authorizing);
        assert_eq!(
            request.url.query_pairs().find(|(k, _)| k == "state").map(|(_, v)| v.into_owned()),
            Some(request.state.clone())
        );

        let err = manager
            .complete_authorization(&descriptor, AuthorizationResponse::code("code", "forged"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("state mismatch"));
        assert_eq!(manager.state("secure"), AuthState::Unauthenticated);

        // the pending flow is consumed
        let err = manager
            .complete_authorization(&descriptor, AuthorizationResponse::code("code", request.state))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no authorization in progress"));
    }

    #[tokio::test]
    async fn denied_callback_reports_reason() {
        let (_dir, manager) = manager();
        let descriptor = oauth_descriptor("http://127.0.0.1:1/token");
        manager.begin_authorization(&descriptor).unwrap();

        let response = AuthorizationResponse {
            error: Some("access_denied".to_string()),
            ..AuthorizationResponse::default()
        };
        let err = manager
            .complete_authorization(&descriptor, response)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn begin_authorization_requires_oauth() {
        let (_dir, manager) = manager();
        let descriptor =
            ServerDescriptor::http("plain", Url::parse("http://127.0.0.1:1/mcp").unwrap());
        assert!(manager.begin_authorization(&descriptor).is_err());
    }

    #[tokio::test]
    async fn logout_removes_token() {
        let (_dir, manager) = manager();
        manager
            .store()
            .save("secure", &TokenRecord::new("cached"))
            .await
            .unwrap();

        manager.logout("secure").await.unwrap();
        assert!(manager.token("secure").await.unwrap().is_none());
        assert_eq!(manager.state("secure"), AuthState::Unauthenticated);
    }
}
