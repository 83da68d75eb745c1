//! Interactive OAuth authorization for the CLI.

use std::sync::Arc;

use async_trait::async_trait;
use dialoguer::{Input, theme::ColorfulTheme};

use crate::core::mcp::{
    AuthConfig, AuthError, AuthorizationHandler, AuthorizationRequest, AuthorizationResponse,
    McpManager,
};

/// Asks the user to open the authorization URL and paste the redirect back.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAuthorizationHandler;

impl PromptAuthorizationHandler {
    #[must_use]
    pub fn shared() -> Arc<dyn AuthorizationHandler> {
        Arc::new(Self)
    }
}

#[async_trait]
impl AuthorizationHandler for PromptAuthorizationHandler {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, AuthError> {
        let pending = request.clone();
        tokio::task::spawn_blocking(move || prompt_for_callback(&pending))
            .await
            .map_err(|e| AuthError::Authorization {
                server: request.server.clone(),
                reason: e.to_string(),
            })?
    }
}

fn prompt_for_callback(
    request: &AuthorizationRequest,
) -> Result<AuthorizationResponse, AuthError> {
    eprintln!("Authorize '{}' by opening this URL:\n", request.server);
    eprintln!("  {}\n", request.url);

    let input: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Paste the redirect URL (or just the code)")
        .interact_text()
        .map_err(|e| AuthError::Authorization {
            server: request.server.clone(),
            reason: format!("failed to read input: {e}"),
        })?;

    Ok(parse_callback(&input, &request.state))
}

/// Interpret pasted input as a callback URL, or as a bare code.
#[must_use]
pub fn parse_callback(input: &str, state: &str) -> AuthorizationResponse {
    let input = input.trim();
    match AuthorizationResponse::from_redirect_url(input) {
        Ok(response) if response.code.is_some() || response.error.is_some() => response,
        _ => AuthorizationResponse::code(input, state),
    }
}

/// Run the authorization-code flow for one server.
///
/// # Errors
///
/// Returns an error if the server is not an OAuth server or the flow fails.
pub async fn auth_login(manager: &McpManager, server: &str) -> anyhow::Result<()> {
    let request = manager.begin_authorization(server)?;
    let response = PromptAuthorizationHandler.authorize(&request).await?;
    let token = manager.complete_authorization(server, response).await?;

    match token.expires_at {
        Some(expires) => println!(
            "Authorized '{server}' (token expires {})",
            expires.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("Authorized '{server}'"),
    }
    Ok(())
}

/// Delete a server's cached token.
///
/// # Errors
///
/// Returns an error if the server is unknown or the token cannot be removed.
pub async fn auth_logout(manager: &McpManager, server: &str) -> anyhow::Result<()> {
    manager.logout(server).await?;
    println!("Logged out of '{server}'");
    Ok(())
}

/// Print token status for OAuth servers.
///
/// # Errors
///
/// Returns an error if the server is unknown or a token cannot be read.
pub async fn auth_status(manager: &McpManager, server: Option<&str>) -> anyhow::Result<()> {
    let names: Vec<String> = match server {
        Some(name) => {
            if manager.config().get(name).is_none() {
                anyhow::bail!("server '{name}' not found in configuration");
            }
            vec![name.to_string()]
        }
        None => manager
            .config()
            .servers()
            .iter()
            .filter(|s| matches!(s.auth, AuthConfig::OAuth(_)))
            .map(|s| s.name.clone())
            .collect(),
    };

    if names.is_empty() {
        println!("No OAuth servers configured");
        return Ok(());
    }

    println!("{:<24} Token", "Server");
    println!("{}", "-".repeat(60));
    for name in names {
        let status = match manager.token(&name).await? {
            None => "none".to_string(),
            Some(token) if token.is_expired() && token.can_refresh() => {
                "expired (refreshable)".to_string()
            }
            Some(token) if token.is_expired() => "expired".to_string(),
            Some(token) => token.expires_at.map_or_else(
                || "valid".to_string(),
                |at| format!("valid until {}", at.format("%Y-%m-%d %H:%M UTC")),
            ),
        };
        println!("{name:<24} {status}");
    }
    Ok(())
}
