use super::*;
use crate::api::UnauthorizedHandler;
use crate::config::HttpTimeouts;
use crate::manager::{MemoryNavigator, Navigator, SessionManager};
use crate::routes::RoutePolicy;
use crate::test_helpers::{FakeGateway, spawn_server, user};
use crate::token_store::TokenStore;

use axum::Json;
use axum::Router;
use axum::routing::put;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn manager_with(gateway: Arc<FakeGateway>, at: &str) -> (Arc<SessionManager>, TokenStore, Arc<MemoryNavigator>) {
    let store = TokenStore::in_memory();
    let navigator = Arc::new(MemoryNavigator::new(at));
    let manager = SessionManager::new(gateway, store.clone(), navigator.clone(), RoutePolicy::default());
    (manager, store, navigator)
}

fn register_form(email: &str, password: &str) -> RegisterForm {
    RegisterForm {
        full_name: "Asha Verma".into(),
        email: email.into(),
        password: password.into(),
        confirm_password: password.into(),
    }
}

// =============================================================================
// password_strength
// =============================================================================

#[test]
fn strength_levels() {
    assert_eq!(password_strength(""), PasswordStrength { level: 0, label: "" });
    assert_eq!(password_strength("abc").level, 1);
    assert_eq!(password_strength("abcdefgh").level, 1);
    assert_eq!(password_strength("abcdefg1").label, "Fair");
    assert_eq!(password_strength("Abcdefg1").label, "Good");
    assert_eq!(password_strength("Abcdefg1!").label, "Strong");
    assert_eq!(password_strength("Abcdefghij1!").label, "Very Strong");
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn university_email_matches_domain_only() {
    assert!(is_university_email("student@lpu.in", "lpu.in"));
    assert!(is_university_email("Student@LPU.IN", "lpu.in"));
    assert!(!is_university_email("foo@gmail.com", "lpu.in"));
    assert!(!is_university_email("foo@mail.lpu.in", "lpu.in"));
    assert!(!is_university_email("@lpu.in", "lpu.in"));
    assert!(!is_university_email("a b@lpu.in", "lpu.in"));
    assert!(!is_university_email("a@b@lpu.in", "lpu.in"));
}

#[test]
fn register_checks_run_in_order() {
    let mut form = register_form("foo@gmail.com", "short");
    form.full_name = "   ".into();
    assert_eq!(form.validate("lpu.in"), Err(ValidationError::FullNameRequired));

    form.full_name = "Asha".into();
    let err = form.validate("lpu.in").unwrap_err();
    assert_eq!(err.to_string(), "Use your university email (e.g. student@lpu.in)");

    form.email = "asha@lpu.in".into();
    assert_eq!(form.validate("lpu.in"), Err(ValidationError::PasswordTooShort));

    form.password = "Str0ng!pass".into();
    assert_eq!(form.validate("lpu.in"), Err(ValidationError::PasswordMismatch));

    form.password = "abcdefgh".into();
    form.confirm_password = "abcdefgh".into();
    assert_eq!(form.validate("lpu.in"), Err(ValidationError::PasswordTooWeak));
}

#[test]
fn register_normalizes_email() {
    let request = register_form("  Asha@LPU.in ", "Str0ng!pass").validate("lpu.in").unwrap();
    assert_eq!(request.email, "asha@lpu.in");
    assert_eq!(request.name, "Asha Verma");
}

#[test]
fn login_checks_presence_and_shape() {
    let form = |email: &str, password: &str| LoginForm { email: email.into(), password: password.into() };
    assert_eq!(form("", "x").validate().unwrap_err(), ValidationError::EmailRequired);
    assert_eq!(form("not-an-email", "x").validate().unwrap_err(), ValidationError::EmailInvalid);
    assert_eq!(form("a@b", "x").validate().unwrap_err(), ValidationError::EmailInvalid);
    assert_eq!(form("a@b.com", "").validate().unwrap_err(), ValidationError::PasswordRequired);
    // No length rule on login.
    assert_eq!(form(" a@b.com ", "short").validate().unwrap().email, "a@b.com");
}

#[test]
fn profile_checks() {
    let mut form = ProfileForm { name: " ".into(), ..ProfileForm::default() };
    assert_eq!(form.validate().unwrap_err().to_string(), "Name is required");
    form.name = "A".into();
    assert_eq!(form.validate().unwrap_err(), ValidationError::NameTooShort);
    form.name = "Asha".into();
    form.bio = "x".repeat(501);
    assert_eq!(form.validate().unwrap_err().to_string(), "Bio must be less than 500 characters");
    form.bio = String::new();
    form.university_id = " 12345 ".into();
    let update = form.validate().unwrap();
    assert_eq!(update.bio, None);
    assert_eq!(update.university_id.as_deref(), Some("12345"));
}

// =============================================================================
// Submit flows
// =============================================================================

#[tokio::test]
async fn successful_login_establishes_session() {
    let gateway = Arc::new(FakeGateway::new().with_account("u1@lpu.in", "Str0ng!pass", "tok-1", user("u1")));
    let (manager, store, navigator) = manager_with(gateway, "/login");

    let form = LoginForm { email: "u1@lpu.in".into(), password: "Str0ng!pass".into() };
    let signed_in = submit_login(&manager, &form).await.unwrap();

    assert_eq!(signed_in, user("u1"));
    let record = store.read().unwrap().unwrap();
    assert_eq!(record.token, "tok-1");
    assert_eq!(record.user, Some(user("u1")));
    assert_eq!(manager.user(), Some(user("u1")));
    assert_eq!(navigator.location(), "/dashboard");
}

#[tokio::test]
async fn bad_login_shows_provider_message() {
    let gateway = Arc::new(FakeGateway::new());
    let (manager, store, navigator) = manager_with(gateway.clone(), "/login");

    let mut state = FormState::default();
    state.begin();
    assert!(state.loading);
    let form = LoginForm { email: "a@b.com".into(), password: "short".into() };
    let result = submit_login(&manager, &form).await;
    state.settle(&result, "Signed in");

    assert_eq!(gateway.sign_in_calls.load(Ordering::SeqCst), 1);
    assert!(!state.loading);
    assert_eq!(state.error.as_deref(), Some("Invalid login credentials"));
    assert_eq!(state.success, None);
    assert!(store.read().unwrap().is_none());
    assert_eq!(manager.user(), None);
    assert_eq!(navigator.history(), vec!["/login".to_owned()]);
}

#[tokio::test]
async fn login_network_failure_is_generic() {
    struct DownGateway;

    #[async_trait::async_trait]
    impl crate::gateway::IdentityGateway for DownGateway {
        async fn sign_in(&self, _: &Credentials) -> Result<crate::types::Session, GatewayError> {
            Err(GatewayError::Network("connection refused".into()))
        }
        async fn sign_up(&self, _: &SignUpRequest) -> Result<SignUpOutcome, GatewayError> {
            Err(GatewayError::Network("connection refused".into()))
        }
        async fn exchange_code(&self, _: &str, _: Option<&str>) -> Result<crate::types::Session, GatewayError> {
            Err(GatewayError::Network("connection refused".into()))
        }
        async fn current_user(&self, _: &str) -> Result<UserSummary, GatewayError> {
            Err(GatewayError::Network("connection refused".into()))
        }
    }

    let manager = SessionManager::new(
        Arc::new(DownGateway),
        TokenStore::in_memory(),
        Arc::new(MemoryNavigator::new("/login")),
        RoutePolicy::default(),
    );
    let form = LoginForm { email: "a@b.com".into(), password: "whatever".into() };
    let err = submit_login(&manager, &form).await.unwrap_err();
    assert!(matches!(err, FormError::Network));
    assert_eq!(err.to_string(), GENERIC_FAILURE);
}

#[tokio::test]
async fn non_university_email_never_reaches_gateway() {
    let gateway = Arc::new(FakeGateway::new());
    let (manager, store, _) = manager_with(gateway.clone(), "/register");

    let err = submit_register(&manager, &register_form("foo@gmail.com", "Str0ng!pass"), "lpu.in")
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("Use your university email"));
    assert_eq!(gateway.sign_up_calls.load(Ordering::SeqCst), 0);
    assert!(store.read().unwrap().is_none());
}

#[tokio::test]
async fn register_pending_verification() {
    let gateway = Arc::new(FakeGateway::new());
    let (manager, store, _) = manager_with(gateway.clone(), "/register");

    let outcome = submit_register(&manager, &register_form("new@lpu.in", "Str0ng!pass"), "lpu.in")
        .await
        .unwrap();

    assert_eq!(outcome, RegisterOutcome::CheckEmail { email: "new@lpu.in".into() });
    assert_eq!(gateway.sign_up_calls.load(Ordering::SeqCst), 1);
    assert!(store.read().unwrap().is_none());
}

#[tokio::test]
async fn register_duplicate_account_keeps_message() {
    let gateway = Arc::new(FakeGateway::new().with_account("taken@lpu.in", "x", "tok-x", user("x")));
    let (manager, _, _) = manager_with(gateway, "/register");

    let err = submit_register(&manager, &register_form("taken@lpu.in", "Str0ng!pass"), "lpu.in")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "User already registered");
}

#[tokio::test]
async fn profile_submit_patches_cached_user() {
    let router = Router::new().route(
        "/api/auth/me",
        put(|Json(body): Json<serde_json::Value>| async move {
            let mut updated = serde_json::to_value(user("u1")).unwrap();
            updated["name"] = body["name"].clone();
            Json(serde_json::json!({"user": updated}))
        }),
    );
    let base = format!("{}/api", spawn_server(router).await);

    let gateway = Arc::new(FakeGateway::new());
    let (manager, store, _) = manager_with(gateway, "/edit-profile");
    manager
        .establish(&crate::types::Session {
            access_token: "tok-1".into(),
            refresh_token: None,
            expires_in: None,
            user: user("u1"),
        })
        .unwrap();
    let handler: Arc<dyn UnauthorizedHandler> = manager.clone();
    let api = ApiClient::new(&base, HttpTimeouts::default(), store.clone(), handler).unwrap();

    let mut form = ProfileForm::from_user(&user("u1"));
    form.name = "Asha Renamed".into();
    let updated = submit_profile(&manager, &api, &form).await.unwrap();

    assert_eq!(updated.name, "Asha Renamed");
    assert_eq!(manager.user().unwrap().name, "Asha Renamed");
    assert_eq!(store.read().unwrap().unwrap().user.unwrap().name, "Asha Renamed");
}

#[tokio::test]
async fn profile_validation_skips_backend() {
    let gateway = Arc::new(FakeGateway::new());
    let (manager, store, _) = manager_with(gateway, "/edit-profile");
    let handler: Arc<dyn UnauthorizedHandler> = manager.clone();
    // Unroutable: any request would fail with a network error instead.
    let api = ApiClient::new("http://127.0.0.1:9/api", HttpTimeouts::default(), store, handler).unwrap();

    let form = ProfileForm { name: "A".into(), ..ProfileForm::default() };
    let err = submit_profile(&manager, &api, &form).await.unwrap_err();
    assert!(matches!(err, FormError::Validation(ValidationError::NameTooShort)));
}
