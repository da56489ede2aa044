//! Server configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::path::PathBuf;

use session::config::{ConfigError, GatewayConfig, env_bool, env_parse};
use session::routes::{DEFAULT_LANDING_PATH, RoutePolicy};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SITE_DIR: &str = "site";

#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error(transparent)]
    Gateway(#[from] ConfigError),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub site_dir: PathBuf,
    pub cookie_secure: bool,
    pub landing_path: String,
    pub return_path: bool,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    /// Build from environment variables.
    ///
    /// - `PORT`: default 3000
    /// - `SITE_DIR`: rendered storefront files, default `./site`
    /// - `COOKIE_SECURE`: defaults to true when `CAMPUSMART_SITE_URL` is https
    /// - `LANDING_PATH`: where signed-in users land, default `/dashboard`
    /// - `GUARD_RETURN_PATH`: append `?next=` to login redirects, default off
    /// - plus the identity gateway variables
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway settings are invalid or `LANDING_PATH`
    /// is not an absolute path.
    pub fn from_env() -> Result<Self, ServerConfigError> {
        let gateway = GatewayConfig::from_env()?;
        let cookie_secure = env_bool("COOKIE_SECURE").unwrap_or_else(|| gateway.site_url.starts_with("https://"));
        let landing_path = std::env::var("LANDING_PATH").unwrap_or_else(|_| DEFAULT_LANDING_PATH.to_owned());
        if !landing_path.starts_with('/') {
            return Err(ServerConfigError::Invalid {
                var: "LANDING_PATH",
                reason: format!("expected an absolute path, got {landing_path:?}"),
            });
        }

        Ok(Self {
            port: env_parse("PORT", DEFAULT_PORT),
            site_dir: std::env::var("SITE_DIR").map_or_else(|_| PathBuf::from(DEFAULT_SITE_DIR), PathBuf::from),
            cookie_secure,
            landing_path,
            return_path: env_bool("GUARD_RETURN_PATH").unwrap_or(false),
            gateway,
        })
    }

    #[must_use]
    pub fn route_policy(&self) -> RoutePolicy {
        RoutePolicy::new(self.landing_path.clone()).with_return_path(self.return_path)
    }
}
