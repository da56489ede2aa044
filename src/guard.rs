//! Route guard middleware.
//!
//! Runs before anything is rendered. The session proof comes from the
//! request itself (the `session_token` cookie, or an `Authorization: Bearer`
//! header), never from client memory.
//!
//! ERROR HANDLING
//! ==============
//! If the identity check itself fails (provider down, unexpected response),
//! the request is treated as anonymous. Private pages therefore fail closed.

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use session::routes::{RouteClass, RouteDecision};

use crate::state::AppState;

pub const COOKIE_NAME: &str = "session_token";

/// Cookie first, then bearer header. Empty values count as absent.
pub(crate) fn session_proof(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(token) = jar.get(COOKIE_NAME).map(Cookie::value).filter(|t| !t.is_empty()) {
        return Some(token.to_owned());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

async fn is_authenticated(state: &AppState, headers: &HeaderMap, path: &str) -> bool {
    let Some(token) = session_proof(headers) else {
        return false;
    };
    match state.gateway.current_user(&token).await {
        Ok(user) => {
            tracing::debug!(user_id = %user.id, path, "session proof accepted");
            true
        }
        Err(e) if e.is_unauthorized() => {
            tracing::debug!(path, "session proof rejected");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, path, "identity check failed; treating request as anonymous");
            false
        }
    }
}

pub async fn route_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    match state.policy.classify(&path) {
        RouteClass::Bypass | RouteClass::Public => return next.run(request).await,
        RouteClass::AuthOnly | RouteClass::Private => {}
    }

    let authenticated = is_authenticated(&state, request.headers(), &path).await;
    let target = request.uri().path_and_query().map_or(path.as_str(), |pq| pq.as_str()).to_owned();
    match state.policy.decide(&target, authenticated) {
        RouteDecision::Allow => next.run(request).await,
        RouteDecision::Redirect(to) => {
            tracing::debug!(from = %path, %to, authenticated, "guard redirect");
            Redirect::temporary(&to).into_response()
        }
    }
}
