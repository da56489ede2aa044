//! Auth routes: provider callback (code exchange) and logout.

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use session::routes::{LOGIN_PATH, RouteClass};
use time::Duration;

use crate::guard::COOKIE_NAME;
use crate::state::AppState;

fn session_cookie(token: String, secure: bool, max_age: Option<Duration>) -> Cookie<'static> {
    let mut cookie = Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build();
    if let Some(max_age) = max_age {
        cookie.set_max_age(max_age);
    }
    cookie
}

/// Only same-site, guarded destinations are honored for `next`.
fn safe_next<'a>(state: &AppState, next: Option<&'a str>) -> Option<&'a str> {
    let next = next?;
    if !next.starts_with('/') || next.starts_with("//") || next.contains('\\') {
        return None;
    }
    (state.policy.classify(next) == RouteClass::Private).then_some(next)
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    code_verifier: Option<String>,
    next: Option<String>,
    error_description: Option<String>,
}

/// `GET /auth/callback`: exchange the provider code, set the session cookie,
/// and land the user.
pub async fn callback(State(state): State<AppState>, jar: CookieJar, Query(params): Query<CallbackQuery>) -> Response {
    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        tracing::warn!(error = ?params.error_description, "auth callback without code");
        return Redirect::temporary(LOGIN_PATH).into_response();
    };

    let session = match state.gateway.exchange_code(code, params.code_verifier.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "auth code exchange failed");
            return Redirect::temporary(LOGIN_PATH).into_response();
        }
    };

    tracing::info!(user_id = %session.user.id, "session established via callback");
    let max_age = session
        .expires_in
        .and_then(|secs| i64::try_from(secs).ok())
        .map(Duration::seconds);
    let cookie = session_cookie(session.access_token, state.cookie_secure, max_age);
    let to = safe_next(&state, params.next.as_deref()).unwrap_or(state.policy.landing_path());
    (jar.add(cookie), Redirect::temporary(to)).into_response()
}

/// `GET|POST /auth/logout`: clear the session cookie and go to login.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let cookie = session_cookie(String::new(), state.cookie_secure, Some(Duration::ZERO));
    (jar.add(cookie), Redirect::temporary(LOGIN_PATH))
}
