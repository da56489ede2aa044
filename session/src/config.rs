//! Client configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:4000/api";
pub const DEFAULT_SITE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_UNIVERSITY_DOMAIN: &str = "lpu.in";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Endpoints and keys for the identity provider and the profile lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub auth_url: String,
    pub anon_key: String,
    pub api_url: String,
    pub site_url: String,
    pub timeouts: HttpTimeouts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub gateway: GatewayConfig,
    pub token_file: PathBuf,
    pub university_domain: String,
}

impl GatewayConfig {
    /// Build from environment variables.
    ///
    /// Required:
    /// - `CAMPUSMART_AUTH_URL`: identity provider base URL
    /// - `CAMPUSMART_AUTH_ANON_KEY`: public API key sent as `apikey`
    ///
    /// Optional:
    /// - `CAMPUSMART_API_URL`: backend base URL (default `http://127.0.0.1:4000/api`)
    /// - `CAMPUSMART_SITE_URL`: storefront origin used in verification links
    /// - `CAMPUSMART_REQUEST_TIMEOUT_SECS`: default 15
    /// - `CAMPUSMART_CONNECT_TIMEOUT_SECS`: default 5
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a URL is not
    /// `http(s)`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth_url = required("CAMPUSMART_AUTH_URL")?;
        let anon_key = required("CAMPUSMART_AUTH_ANON_KEY")?;
        let api_url = std::env::var("CAMPUSMART_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_owned());
        let site_url = std::env::var("CAMPUSMART_SITE_URL").unwrap_or_else(|_| DEFAULT_SITE_URL.to_owned());

        Ok(Self {
            auth_url: validate_url("CAMPUSMART_AUTH_URL", auth_url)?,
            anon_key,
            api_url: validate_url("CAMPUSMART_API_URL", api_url)?,
            site_url: validate_url("CAMPUSMART_SITE_URL", site_url)?,
            timeouts: HttpTimeouts {
                request_secs: env_parse("CAMPUSMART_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
                connect_secs: env_parse("CAMPUSMART_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            },
        })
    }
}

impl ClientConfig {
    /// Gateway settings plus:
    /// - `CAMPUSMART_TOKEN_FILE`: default `$HOME/.campusmart/session.json`
    /// - `CAMPUSMART_UNIVERSITY_DOMAIN`: default `lpu.in`
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway settings are invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let gateway = GatewayConfig::from_env()?;
        let token_file = std::env::var("CAMPUSMART_TOKEN_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_token_file());
        let university_domain = std::env::var("CAMPUSMART_UNIVERSITY_DOMAIN")
            .map(|d| d.trim().trim_start_matches('@').to_ascii_lowercase())
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_UNIVERSITY_DOMAIN.to_owned());
        Ok(Self { gateway, token_file, university_domain })
    }
}

fn default_token_file() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".campusmart").join("session.json")
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn validate_url(var: &'static str, raw: String) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_owned())
    } else {
        Err(ConfigError::Invalid { var, reason: format!("expected http(s) URL, got {raw:?}") })
    }
}

pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[must_use]
pub fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
