//! Shared fixtures for unit tests: a scripted in-memory identity gateway and
//! a throwaway HTTP server for exercising the reqwest clients.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::config::{GatewayConfig, HttpTimeouts};
use crate::gateway::{Credentials, GatewayError, IdentityGateway, SignUpOutcome, SignUpRequest};
use crate::types::{Session, UserSummary};

#[must_use]
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

/// In-memory gateway: tokens map to users, accounts map `email -> (password, token)`.
#[derive(Default)]
pub struct FakeGateway {
    users_by_token: Mutex<HashMap<String, UserSummary>>,
    accounts: Mutex<HashMap<String, (String, String)>>,
    pub current_user_calls: AtomicUsize,
    pub sign_in_calls: AtomicUsize,
    pub sign_up_calls: AtomicUsize,
    /// When set, `current_user` waits for a permit before answering.
    gate: Option<Notify>,
    fail_network: Mutex<bool>,
}

impl FakeGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway whose `current_user` calls block until [`FakeGateway::release`].
    #[must_use]
    pub fn gated() -> Self {
        Self { gate: Some(Notify::new()), ..Self::default() }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn with_token(self, token: &str, user: UserSummary) -> Self {
        self.users_by_token.lock().unwrap().insert(token.into(), user);
        self
    }

    pub fn with_account(self, email: &str, password: &str, token: &str, user: UserSummary) -> Self {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.into(), (password.into(), token.into()));
        self.with_token(token, user)
    }

    pub fn set_network_failure(&self, failing: bool) {
        *self.fail_network.lock().unwrap() = failing;
    }

    pub fn calls(&self) -> usize {
        self.current_user_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IdentityGateway for FakeGateway {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, GatewayError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let token = {
            let accounts = self.accounts.lock().unwrap();
            match accounts.get(&credentials.email) {
                Some((password, token)) if *password == credentials.password => token.clone(),
                _ => {
                    return Err(GatewayError::Rejected { status: 400, message: "Invalid login credentials".into() });
                }
            }
        };
        let user = self.users_by_token.lock().unwrap().get(&token).cloned().unwrap();
        Ok(Session { access_token: token, refresh_token: None, expires_in: Some(3600), user })
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, GatewayError> {
        self.sign_up_calls.fetch_add(1, Ordering::SeqCst);
        if self.accounts.lock().unwrap().contains_key(&request.email) {
            return Err(GatewayError::Rejected { status: 422, message: "User already registered".into() });
        }
        Ok(SignUpOutcome::PendingVerification { email: request.email.clone() })
    }

    async fn exchange_code(&self, code: &str, _code_verifier: Option<&str>) -> Result<Session, GatewayError> {
        let user = self.users_by_token.lock().unwrap().get(code).cloned();
        match user {
            Some(user) => Ok(Session { access_token: code.into(), refresh_token: None, expires_in: None, user }),
            None => Err(GatewayError::Rejected { status: 400, message: "invalid flow state".into() }),
        }
    }

    async fn current_user(&self, token: &str) -> Result<UserSummary, GatewayError> {
        self.current_user_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if *self.fail_network.lock().unwrap() {
            return Err(GatewayError::Network("connection refused".into()));
        }
        self.users_by_token
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or(GatewayError::Unauthorized)
    }
}

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[must_use]
pub fn gateway_config(base: &str) -> GatewayConfig {
    GatewayConfig {
        auth_url: base.to_owned(),
        anon_key: "anon-key".into(),
        api_url: format!("{base}/api"),
        site_url: "http://localhost:3000".into(),
        timeouts: HttpTimeouts::default(),
    }
}
