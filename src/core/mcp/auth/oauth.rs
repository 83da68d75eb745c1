//! OAuth2 authorization-code and refresh-token grants

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::OAuthConfig;
use super::pkce::{CHALLENGE_METHOD, PkceChallenge};
use super::token_store::TokenRecord;
use crate::core::secret;

/// Longest slice of a token endpoint error body kept in error messages
const ERROR_EXCERPT_CHARS: usize = 300;

/// Token endpoint failures
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("token endpoint unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status; `detail` is the OAuth error code or a masked excerpt
    #[error("token endpoint returned {status}: {detail}")]
    Status { status: StatusCode, detail: String },

    #[error("invalid token response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Token endpoint success body
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert to a stored record, keeping `previous_refresh` when the
    /// server did not rotate the refresh token.
    #[must_use]
    pub fn into_record(self, previous_refresh: Option<String>) -> TokenRecord {
        let mut record = TokenRecord::new(self.access_token);
        if let Some(token_type) = self.token_type {
            record.token_type = token_type;
        }
        if let Some(seconds) = self.expires_in {
            record = record.expires_in(seconds);
        }
        record.refresh_token = self.refresh_token.or(previous_refresh);
        record.scope = self.scope;
        record
    }
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Build the URL the user opens to grant access.
#[must_use]
pub fn authorization_url(config: &OAuthConfig, state: &str, pkce: &PkceChallenge) -> Url {
    let mut url = config.authorization_url.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge", pkce.challenge())
            .append_pair("code_challenge_method", CHALLENGE_METHOD);
        if let Some(scope) = &config.scope {
            query.append_pair("scope", scope);
        }
    }
    url
}

/// Exchange an authorization code (plus PKCE verifier) for a token.
pub async fn exchange_code(
    http: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse, OAuthError> {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    form.append_pair("grant_type", "authorization_code")
        .append_pair("code", code)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("code_verifier", verifier);
    append_client(&mut form, config);

    post_form(http, config, form.finish()).await
}

/// Obtain a new access token with a refresh token.
pub async fn refresh_token(
    http: &reqwest::Client,
    config: &OAuthConfig,
    refresh_token: &str,
) -> Result<TokenResponse, OAuthError> {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    form.append_pair("grant_type", "refresh_token")
        .append_pair("refresh_token", refresh_token);
    if let Some(scope) = &config.scope {
        form.append_pair("scope", scope);
    }
    append_client(&mut form, config);

    post_form(http, config, form.finish()).await
}

fn append_client(form: &mut url::form_urlencoded::Serializer<'_, String>, config: &OAuthConfig) {
    form.append_pair("client_id", &config.client_id);
    if let Some(secret) = &config.client_secret {
        form.append_pair("client_secret", secret);
    }
}

async fn post_form(
    http: &reqwest::Client,
    config: &OAuthConfig,
    body: String,
) -> Result<TokenResponse, OAuthError> {
    let response = http
        .post(config.token_url.clone())
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(ACCEPT, "application/json")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let detail = match serde_json::from_str::<TokenErrorBody>(&text) {
            Ok(body) => match body.error_description {
                Some(description) => format!("{}: {description}", body.error),
                None => body.error,
            },
            Err(_) => secret::excerpt(&text, ERROR_EXCERPT_CHARS),
        };
        return Err(OAuthError::Status { status, detail });
    }

    Ok(serde_json::from_str(&text)?)
}
