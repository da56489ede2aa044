//! Remote identity gateway: credential sign-in, sign-up, code exchange, and
//! current-user lookup.
//!
//! DESIGN
//! ======
//! The [`IdentityGateway`] trait is the seam between session logic and the
//! hosted auth provider, so the manager, forms, and route guard can be tested
//! against an in-memory fake. [`HttpIdentityGateway`] speaks the GoTrue token
//! endpoints for credentials and asks the marketplace backend (`/auth/me`)
//! for the profile, because only the backend knows `isAdmin`/`isBlocked`.
//!
//! ERROR HANDLING
//! ==============
//! Provider rejections keep the provider's own message so forms can show it
//! verbatim. `401`/`403` on the profile lookup map to `Unauthorized`, which
//! the session manager treats as "deauthenticate".

#[cfg(test)]
#[path = "gateway_test.rs"]
mod tests;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::types::{Session, UserEnvelope, UserSummary};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The provider refused the request (bad credentials, duplicate account).
    #[error("{message}")]
    Rejected { status: u16, message: String },
    /// The presented token is not (or no longer) valid.
    #[error("session token rejected")]
    Unauthorized,
    #[error("identity service unreachable: {0}")]
    Network(String),
    #[error("unexpected identity service response: {0}")]
    Parse(String),
    #[error("identity client build failed: {0}")]
    ClientBuild(String),
}

impl GatewayError {
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

// =============================================================================
// REQUESTS / OUTCOMES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Account created; the provider emailed a verification link.
    PendingVerification { email: String },
    /// The provider issued a session immediately (verification disabled).
    SignedIn(Session),
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Exchange email + password for a session.
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, GatewayError>;

    /// Create an account.
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, GatewayError>;

    /// Exchange an auth-callback code for a session.
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<Session, GatewayError>;

    /// Resolve a bearer token to the current profile.
    async fn current_user(&self, token: &str) -> Result<UserSummary, GatewayError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

pub struct HttpIdentityGateway {
    http: reqwest::Client,
    auth_url: String,
    anon_key: String,
    api_url: String,
    site_url: String,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct PkceGrant<'a> {
    auth_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
}

#[derive(Serialize)]
struct SignUpBody<'a> {
    email: &'a str,
    password: &'a str,
    data: SignUpMetadata<'a>,
}

#[derive(Serialize)]
struct SignUpMetadata<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl HttpIdentityGateway {
    /// Build the gateway client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| GatewayError::ClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            auth_url: config.auth_url.trim_end_matches('/').to_owned(),
            anon_key: config.anon_key.clone(),
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            site_url: config.site_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn token_grant<B: Serialize + Sync>(&self, grant_type: &str, body: &B) -> Result<TokenResponse, GatewayError> {
        let url = format!("{}/auth/v1/token", self.auth_url);
        let response = self
            .http
            .post(url)
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::Rejected { status, message: parse_error_message(status, &text) });
        }
        serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    async fn session_from_token(&self, token: TokenResponse) -> Result<Session, GatewayError> {
        let user = self.current_user(&token.access_token).await?;
        Ok(Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            user,
        })
    }
}

#[async_trait::async_trait]
impl IdentityGateway for HttpIdentityGateway {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, GatewayError> {
        let grant = PasswordGrant { email: &credentials.email, password: &credentials.password };
        let token = self.token_grant("password", &grant).await?;
        tracing::debug!("password grant accepted; fetching profile");
        self.session_from_token(token).await
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, GatewayError> {
        let url = format!("{}/auth/v1/signup", self.auth_url);
        let redirect_to = format!("{}/auth/verify", self.site_url);
        let body = SignUpBody {
            email: &request.email,
            password: &request.password,
            data: SignUpMetadata { name: &request.name },
        };
        let response = self
            .http
            .post(url)
            .query(&[("redirect_to", redirect_to.as_str())])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::Rejected { status, message: parse_error_message(status, &text) });
        }

        match parse_sign_up(&text)? {
            Some(token) => Ok(SignUpOutcome::SignedIn(self.session_from_token(token).await?)),
            None => Ok(SignUpOutcome::PendingVerification { email: request.email.clone() }),
        }
    }

    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<Session, GatewayError> {
        let grant = PkceGrant { auth_code: code, code_verifier };
        let token = self.token_grant("pkce", &grant).await?;
        self.session_from_token(token).await
    }

    async fn current_user(&self, token: &str) -> Result<UserSummary, GatewayError> {
        let url = format!("{}/auth/me", self.api_url);
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(GatewayError::Unauthorized);
        }
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::Rejected { status, message: parse_error_message(status, &text) });
        }
        let envelope: UserEnvelope = serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))?;
        Ok(envelope.user)
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Pull a human-readable message out of a provider error body.
fn parse_error_message(status: u16, body: &str) -> String {
    const KEYS: [&str; 4] = ["error_description", "msg", "message", "error"];

    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            KEYS.iter()
                .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str).map(str::to_owned))
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"))
}

/// A sign-up response carries a session only when verification is off.
fn parse_sign_up(body: &str) -> Result<Option<TokenResponse>, GatewayError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
    if value.get("access_token").and_then(serde_json::Value::as_str).is_none() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| GatewayError::Parse(e.to_string()))
}
