//! Path classification shared by the route guard and the session manager.
//!
//! DESIGN
//! ======
//! One allow-list decides which paths are public, which of those are
//! auth-only (login/register), and which are never guarded (static assets,
//! health checks). Everything else is private. Both the server-side guard and
//! the client-side redirect effect call [`RoutePolicy::decide`], so the two
//! layers cannot drift apart.

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;

pub const LOGIN_PATH: &str = "/login";
pub const REGISTER_PATH: &str = "/register";
pub const DEFAULT_LANDING_PATH: &str = "/dashboard";

const AUTH_ONLY_PATHS: &[&str] = &[LOGIN_PATH, REGISTER_PATH];
const PUBLIC_PATHS: &[&str] = &["/verify", "/auth/verify", "/auth/callback", "/auth/logout"];
const BYPASS_PATHS: &[&str] = &["/pkg", "/assets", "/favicon.ico", "/healthz"];

/// How a request path is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Never inspected (static assets, health checks).
    Bypass,
    /// Public and only meaningful while signed out (login, register).
    AuthOnly,
    /// Public regardless of session (verification landing, auth callback).
    Public,
    /// Requires a session.
    Private,
}

/// Outcome of evaluating a path against the current authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    landing_path: String,
    preserve_return_path: bool,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self { landing_path: DEFAULT_LANDING_PATH.to_owned(), preserve_return_path: false }
    }
}

impl RoutePolicy {
    #[must_use]
    pub fn new(landing_path: impl Into<String>) -> Self {
        Self { landing_path: landing_path.into(), ..Self::default() }
    }

    /// Append `?next=<path>` to login redirects. Only a convention; the login
    /// surface is free to ignore it.
    #[must_use]
    pub fn with_return_path(mut self, enabled: bool) -> Self {
        self.preserve_return_path = enabled;
        self
    }

    #[must_use]
    pub fn landing_path(&self) -> &str {
        &self.landing_path
    }

    #[must_use]
    pub fn classify(&self, path: &str) -> RouteClass {
        let path = normalize(path);
        if BYPASS_PATHS.iter().any(|prefix| matches_prefix(path, prefix)) {
            RouteClass::Bypass
        } else if AUTH_ONLY_PATHS.iter().any(|prefix| matches_prefix(path, prefix)) {
            RouteClass::AuthOnly
        } else if PUBLIC_PATHS.iter().any(|prefix| matches_prefix(path, prefix)) {
            RouteClass::Public
        } else {
            RouteClass::Private
        }
    }

    #[must_use]
    pub fn is_auth_only(&self, path: &str) -> bool {
        self.classify(path) == RouteClass::AuthOnly
    }

    /// Decide what happens to a navigation to `path`.
    #[must_use]
    pub fn decide(&self, path: &str, authenticated: bool) -> RouteDecision {
        match (self.classify(path), authenticated) {
            (RouteClass::Private, false) => RouteDecision::Redirect(self.login_redirect(path)),
            (RouteClass::AuthOnly, true) => RouteDecision::Redirect(self.landing_path.clone()),
            _ => RouteDecision::Allow,
        }
    }

    fn login_redirect(&self, path: &str) -> String {
        let path = normalize(path);
        if self.preserve_return_path && path != "/" {
            let next = path.split('/').map(urlencoding::encode).collect::<Vec<_>>().join("/");
            format!("{LOGIN_PATH}?next={next}")
        } else {
            LOGIN_PATH.to_owned()
        }
    }
}

/// Strip any query string or fragment and trailing slashes (keeping `/`).
fn normalize(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// `prefix` matches `path` only at a segment boundary: `/login` matches
/// `/login` and `/login/reset`, not `/loginx`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
