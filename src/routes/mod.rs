//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The rendered storefront is served as static files from `SITE_DIR`. Every
//! request, including the static fallback, passes through the route guard
//! first; the guard itself lets assets and `/healthz` through untouched.

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

pub mod auth;

use std::path::Path;

use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::get;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::guard;
use crate::state::AppState;

pub fn app(state: AppState, site_dir: &Path) -> Router {
    let site = ServeDir::new(site_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", get(auth::logout).post(auth::logout))
        .route("/healthz", get(healthz))
        .fallback_service(site)
        .layer(middleware::from_fn_with_state(state.clone(), guard::route_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
