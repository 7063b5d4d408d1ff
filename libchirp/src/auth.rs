//! Credential resolution and OAuth2 token lifecycle
//!
//! [`resolve_token`] turns a stored account credential into a bearer
//! string ready for the Authorization header. Bearer credentials pass
//! through verbatim. OAuth2 credentials are checked against their expiry
//! with a 60-second safety margin: a token inside the margin is refreshed
//! through a [`TokenRefresher`] and the updated credential is persisted
//! before the call proceeds, so the file always reflects the token that
//! was last handed out.
//!
//! The states are: valid (returned as-is), expiring and refreshable
//! (refresh, persist, return), expiring with no refresh path (error), and
//! invalid shape (error). The transition trigger is wall-clock time
//! crossing `expires_at - 60s`.
//!
//! The login half of this module carries the PKCE pieces of the
//! authorization-code flow: verifier/challenge generation, the authorize
//! URL, the loopback listener that catches the browser redirect, and the
//! code-for-token exchange.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::accounts::{self, AccountStore};
use crate::context::Context;
use crate::error::{ApiError, AuthError, Result};

/// Refresh this long before actual expiry, so a token never goes stale
/// mid-request.
pub const EXPIRY_MARGIN_MS: i64 = 60_000;

pub const DEFAULT_AUTHORIZE_URL: &str = "https://x.com/i/oauth2/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";

/// Scopes requested by `auth login` when none are given. `offline.access`
/// is what makes the provider hand back a refresh token.
pub const DEFAULT_SCOPES: &[&str] = &[
    "tweet.read",
    "tweet.write",
    "users.read",
    "follows.read",
    "follows.write",
    "dm.read",
    "dm.write",
    "list.read",
    "list.write",
    "media.write",
    "offline.access",
];

/// Applied when a token endpoint omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 7200;

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRequest {
    pub client_id: String,
    pub refresh_token: String,
}

/// Token set handed back by the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Absent when the provider keeps the old refresh token valid.
    pub refresh_token: Option<String>,
    /// Epoch milliseconds.
    pub expires_at: i64,
    pub scopes: Vec<String>,
}

/// Exchange a refresh token for a fresh token set.
///
/// The resolver treats implementations as opaque: failures propagate to
/// the caller unchanged and are never retried at this layer (the next
/// command starts over from the stored credential).
///
/// # Example Implementation
///
/// ```no_run
/// use async_trait::async_trait;
/// use libchirp::auth::{RefreshRequest, RefreshedToken, TokenRefresher};
/// use libchirp::error::Result;
///
/// struct FixedRefresher;
///
/// #[async_trait]
/// impl TokenRefresher for FixedRefresher {
///     async fn refresh(&self, _request: &RefreshRequest) -> Result<RefreshedToken> {
///         Ok(RefreshedToken {
///             access_token: "fresh".to_string(),
///             refresh_token: None,
///             expires_at: 0,
///             scopes: Vec::new(),
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshedToken>;
}

/// Resolve a usable bearer string for the named (or default) account.
///
/// OAuth2 credentials inside the expiry margin are refreshed through
/// `refresher`; on success the merged credential (new access token, new
/// or retained refresh token, new expiry) is written back to disk before
/// the token is returned. All other stored fields survive the merge.
pub async fn resolve_token(
    ctx: &Context,
    store: &mut AccountStore,
    refresher: &dyn TokenRefresher,
    account: Option<&str>,
) -> Result<String> {
    let (name, credential) = {
        let (name, credential) = store.get(account)?;
        (name, credential.clone())
    };

    match credential.auth_type.as_str() {
        accounts::AUTH_TYPE_BEARER => match credential.bearer_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(token.to_string()),
            _ => Err(AuthError::EmptyBearerToken.into()),
        },
        accounts::AUTH_TYPE_OAUTH2 => {
            let access_token = credential
                .access_token
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or(AuthError::MissingAccessToken)?;

            // Absent expiry reads as 0: already expired.
            let expires_at = credential.expires_at.unwrap_or(0);
            let now = Utc::now().timestamp_millis();
            if now < expires_at - EXPIRY_MARGIN_MS {
                return Ok(access_token);
            }

            tracing::debug!("access token for '{}' is expiring, refreshing", name);
            let refresh_token = credential.refresh_token.clone().filter(|t| !t.is_empty());
            let client_id = credential.client_id.clone().filter(|c| !c.is_empty());
            let (Some(refresh_token), Some(client_id)) = (refresh_token, client_id) else {
                return Err(AuthError::CannotRefresh.into());
            };

            let refreshed = refresher
                .refresh(&RefreshRequest {
                    client_id,
                    refresh_token: refresh_token.clone(),
                })
                .await?;

            let mut updated = credential;
            updated.access_token = Some(refreshed.access_token.clone());
            updated.refresh_token = refreshed.refresh_token.clone().or(Some(refresh_token));
            updated.expires_at = Some(refreshed.expires_at);
            if !refreshed.scopes.is_empty() {
                updated.scopes = Some(refreshed.scopes.clone());
            }
            store.set(&name, updated);
            store.save(ctx)?;
            tracing::debug!("persisted refreshed token for '{}'", name);

            Ok(refreshed.access_token)
        }
        other => Err(AuthError::UnknownAuthType(other.to_string()).into()),
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Seconds until expiry.
    #[serde(default)]
    expires_in: Option<i64>,
    /// Space-separated scope list.
    #[serde(default)]
    scope: Option<String>,
}

impl TokenEndpointResponse {
    fn into_refreshed(self) -> RefreshedToken {
        let ttl = self.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        RefreshedToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now().timestamp_millis() + ttl * 1000,
            scopes: self
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// Refresher talking to the real token endpoint with a public-client
/// (PKCE) refresh grant.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenRefresher {
    pub fn new() -> Self {
        Self::with_token_url(DEFAULT_TOKEN_URL)
    }

    pub fn with_token_url(token_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
        }
    }

    /// Authorization-code half of the PKCE flow, used by `auth login`.
    pub async fn exchange_code(
        &self,
        client_id: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<RefreshedToken> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(ApiError::Network)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::LoginFailed(format!(
                "token exchange returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            ))
            .into());
        }
        let token: TokenEndpointResponse = response.json().await.map_err(ApiError::Network)?;
        Ok(token.into_refreshed())
    }
}

impl Default for HttpTokenRefresher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshedToken> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", request.refresh_token.as_str()),
            ("client_id", request.client_id.as_str()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(ApiError::Network)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            ))
            .into());
        }
        let token: TokenEndpointResponse = response.json().await.map_err(ApiError::Network)?;
        Ok(token.into_refreshed())
    }
}

/// PKCE material for one login attempt.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

/// Fresh verifier (64 random bytes, URL-safe base64), its S256 challenge,
/// and a random state value.
pub fn generate_pkce() -> PkceChallenge {
    let mut verifier_bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut verifier_bytes);
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    let mut state_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut state_bytes);

    PkceChallenge {
        verifier,
        challenge,
        state: URL_SAFE_NO_PAD.encode(state_bytes),
    }
}

/// Authorization URL the user opens in a browser.
pub fn build_authorize_url(
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    pkce: &PkceChallenge,
) -> Result<String> {
    let mut url = Url::parse(DEFAULT_AUTHORIZE_URL)
        .map_err(|e| AuthError::LoginFailed(format!("invalid authorize URL: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", &pkce.state)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256");
    Ok(url.to_string())
}

/// Wait for the provider to redirect the browser back to `listener` and
/// return the authorization code. Verifies the `state` parameter against
/// the one sent out. Unrelated requests (favicons and friends) get a 404
/// and the wait continues. Time-boxed by `timeout`.
pub async fn wait_for_callback(
    listener: TcpListener,
    expected_state: &str,
    timeout: std::time::Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, accept_callback(&listener, expected_state)).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::LoginFailed(format!(
            "timed out after {} seconds waiting for the browser redirect",
            timeout.as_secs()
        ))
        .into()),
    }
}

async fn accept_callback(listener: &TcpListener, expected_state: &str) -> Result<String> {
    loop {
        let (mut socket, _) = listener
            .accept()
            .await
            .map_err(|e| AuthError::LoginFailed(format!("callback listener failed: {}", e)))?;

        // The redirect is a bare GET; one read covers the request head.
        let mut buf = vec![0u8; 4096];
        let n = socket
            .read(&mut buf)
            .await
            .map_err(|e| AuthError::LoginFailed(format!("callback read failed: {}", e)))?;
        let request = String::from_utf8_lossy(&buf[..n]).into_owned();

        let Some(path) = request_path(&request) else {
            respond(&mut socket, 400, "Bad request").await;
            continue;
        };
        if !path.starts_with("/callback") {
            respond(&mut socket, 404, "Not found").await;
            continue;
        }

        let url = match Url::parse(&format!("http://127.0.0.1{}", path)) {
            Ok(url) => url,
            Err(_) => {
                respond(&mut socket, 400, "Bad request").await;
                continue;
            }
        };
        let mut code = None;
        let mut state = None;
        let mut error = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            respond(&mut socket, 200, "Authorization was denied. You can close this window.")
                .await;
            return Err(AuthError::LoginFailed(format!("authorization denied: {}", error)).into());
        }
        if state.as_deref() != Some(expected_state) {
            respond(&mut socket, 400, "State mismatch").await;
            return Err(
                AuthError::LoginFailed("state mismatch in OAuth callback".to_string()).into(),
            );
        }
        match code {
            Some(code) => {
                respond(
                    &mut socket,
                    200,
                    "Authentication complete. You can close this window and return to the terminal.",
                )
                .await;
                return Ok(code);
            }
            None => {
                respond(&mut socket, 400, "Missing code parameter").await;
                continue;
            }
        }
    }
}

fn request_path(request: &str) -> Option<&str> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    (method == "GET").then_some(path)
}

async fn respond(socket: &mut TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Bad Request",
    };
    let page = format!("<html><body><p>{}</p></body></html>", body);
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        page.len(),
        page
    );
    // Best effort; the browser closing early is not our problem.
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

#[cfg(test)]
mod tests;
