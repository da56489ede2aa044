//! Router fixtures: a scripted identity gateway and a throwaway site dir.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use session::gateway::{Credentials, GatewayError, IdentityGateway, SignUpOutcome, SignUpRequest};
use session::routes::RoutePolicy;
use session::types::{Session, UserSummary};
use tower::ServiceExt;

use crate::state::AppState;

pub fn user(id: &str) -> UserSummary {
    UserSummary {
        id: id.into(),
        name: format!("User {id}"),
        email: format!("{id}@lpu.in"),
        is_admin: false,
        is_blocked: false,
        university_id: None,
        avatar_url: None,
        bio: None,
        created_at: None,
    }
}

/// Tokens map to users; codes map to tokens. `down` makes every call a
/// network error.
#[derive(Default)]
pub struct MockGateway {
    pub tokens: HashMap<String, UserSummary>,
    pub codes: HashMap<String, String>,
    pub down: bool,
    pub lookups: AtomicUsize,
}

impl MockGateway {
    pub fn with_token(mut self, token: &str, user: UserSummary) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    pub fn with_code(mut self, code: &str, token: &str) -> Self {
        self.codes.insert(code.into(), token.into());
        self
    }

    pub fn down() -> Self {
        Self { down: true, ..Self::default() }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityGateway for MockGateway {
    async fn sign_in(&self, _credentials: &Credentials) -> Result<Session, GatewayError> {
        Err(GatewayError::Rejected { status: 400, message: "not supported".into() })
    }

    async fn sign_up(&self, _request: &SignUpRequest) -> Result<SignUpOutcome, GatewayError> {
        Err(GatewayError::Rejected { status: 400, message: "not supported".into() })
    }

    async fn exchange_code(&self, code: &str, _code_verifier: Option<&str>) -> Result<Session, GatewayError> {
        if self.down {
            return Err(GatewayError::Network("connection refused".into()));
        }
        let token = self
            .codes
            .get(code)
            .ok_or_else(|| GatewayError::Rejected { status: 400, message: "invalid flow state".into() })?;
        let user = self.tokens.get(token).cloned().ok_or(GatewayError::Unauthorized)?;
        Ok(Session { access_token: token.clone(), refresh_token: None, expires_in: Some(3600), user })
    }

    async fn current_user(&self, token: &str) -> Result<UserSummary, GatewayError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(GatewayError::Network("connection refused".into()));
        }
        self.tokens.get(token).cloned().ok_or(GatewayError::Unauthorized)
    }
}

pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<MockGateway>,
    _site: tempfile::TempDir,
}

impl TestApp {
    pub fn new(gateway: MockGateway) -> Self {
        Self::with_policy(gateway, RoutePolicy::default())
    }

    pub fn with_policy(gateway: MockGateway, policy: RoutePolicy) -> Self {
        let site = tempfile::tempdir().unwrap();
        // Extensionless files so `/dashboard` resolves without a directory redirect.
        for page in ["dashboard", "login", "register", "orders", "verify", "products"] {
            std::fs::write(site.path().join(page), format!("<h1>{page}</h1>")).unwrap();
        }
        std::fs::create_dir_all(site.path().join("assets")).unwrap();
        std::fs::write(site.path().join("assets").join("app.css"), "body {}").unwrap();

        let gateway = Arc::new(gateway);
        let state = AppState::new(gateway.clone(), policy, false);
        Self { router: crate::routes::app(state, site.path()), gateway, _site: site }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = cookie {
            request = request.header("cookie", format!("{}={token}", crate::guard::COOKIE_NAME));
        }
        self.router.clone().oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
    }
}

pub fn location(response: &Response<Body>) -> Option<&str> {
    response.headers().get("location").and_then(|v| v.to_str().ok())
}
