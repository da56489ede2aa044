//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers and the route guard via the
//! `State` extractor. It holds the identity gateway used to check session
//! proofs and the route policy shared with the client-side session manager.

use std::sync::Arc;

use session::gateway::IdentityGateway;
use session::routes::RoutePolicy;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn IdentityGateway>,
    pub policy: RoutePolicy,
    pub cookie_secure: bool,
}

impl AppState {
    #[must_use]
    pub fn new(gateway: Arc<dyn IdentityGateway>, policy: RoutePolicy, cookie_secure: bool) -> Self {
        Self { gateway, policy, cookie_secure }
    }
}
