//! Login, registration, and profile forms.
//!
//! Each form validates locally first; nothing reaches the network until the
//! input passes. Gateway rejections keep the provider's message, anything
//! else collapses into one generic retry prompt.
//!
//! ERROR HANDLING
//! ==============
//! - [`ValidationError`]: rejected before any call, message shown inline.
//! - [`FormError::Rejected`]: provider or backend said no; stored state untouched.
//! - [`FormError::Network`]: transport or unexpected failure, generic message.
//! - [`FormError::Unauthorized`]: the session was already torn down by the
//!   logout funnel; the form just reports it.

#[cfg(test)]
#[path = "forms_test.rs"]
mod tests;

use crate::api::{ApiClient, ApiError, ProfileUpdate};
use crate::gateway::{Credentials, GatewayError, SignUpOutcome, SignUpRequest};
use crate::manager::SessionManager;
use crate::token_store::StoreError;
use crate::types::UserSummary;

pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";
pub const MIN_PASSWORD_LEN: usize = 8;
/// Registration requires at least "Good".
pub const MIN_PASSWORD_LEVEL: u8 = 3;
pub const MIN_NAME_LEN: usize = 2;
pub const MAX_BIO_LEN: usize = 500;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Full name is required")]
    FullNameRequired,
    #[error("Use your university email (e.g. student@{domain})")]
    NotUniversityEmail { domain: String },
    #[error("Password must be at least 8 characters")]
    PasswordTooShort,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password is too weak")]
    PasswordTooWeak,
    #[error("Email is required")]
    EmailRequired,
    #[error("Enter a valid email address")]
    EmailInvalid,
    #[error("Password is required")]
    PasswordRequired,
    #[error("Name is required")]
    NameRequired,
    #[error("Name must be at least 2 characters")]
    NameTooShort,
    #[error("Bio must be less than 500 characters")]
    BioTooLong,
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Rejected(String),
    #[error("Something went wrong. Please try again.")]
    Network,
    #[error("Your session has expired. Please sign in again.")]
    Unauthorized,
}

impl From<GatewayError> for FormError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Rejected { message, .. } => Self::Rejected(message),
            GatewayError::Unauthorized => Self::Rejected(e.to_string()),
            GatewayError::Network(_) | GatewayError::Parse(_) | GatewayError::ClientBuild(_) => {
                tracing::warn!(error = %e, "identity gateway call failed");
                Self::Network
            }
        }
    }
}

impl From<ApiError> for FormError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized => Self::Unauthorized,
            ApiError::Status { message, .. } if !message.is_empty() => Self::Rejected(message),
            other => {
                tracing::warn!(error = %other, "backend call failed");
                Self::Network
            }
        }
    }
}

impl From<StoreError> for FormError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "failed to persist session");
        Self::Network
    }
}

// =============================================================================
// FORM STATE
// =============================================================================

/// What a form shows: a disabled submit while loading, then an error or a
/// success notice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState {
    pub loading: bool,
    pub error: Option<String>,
    pub success: Option<String>,
}

impl FormState {
    pub fn begin(&mut self) {
        self.loading = true;
        self.error = None;
        self.success = None;
    }

    /// Record the outcome of a submit.
    pub fn settle<T>(&mut self, result: &Result<T, FormError>, success: &str) {
        self.loading = false;
        match result {
            Ok(_) => self.success = Some(success.to_owned()),
            Err(e) => self.error = Some(e.to_string()),
        }
    }
}

// =============================================================================
// PASSWORD STRENGTH
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordStrength {
    /// 0 for an empty password, otherwise 1 (weak) through 5 (very strong).
    pub level: u8,
    pub label: &'static str,
}

#[must_use]
pub fn password_strength(password: &str) -> PasswordStrength {
    if password.is_empty() {
        return PasswordStrength { level: 0, label: "" };
    }
    let len = password.chars().count();
    let checks = [
        len >= MIN_PASSWORD_LEN,
        len >= 12,
        password.chars().any(|c| c.is_ascii_lowercase()) && password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    let score = checks.iter().filter(|passed| **passed).count();
    match score {
        0 | 1 => PasswordStrength { level: 1, label: "Weak" },
        2 => PasswordStrength { level: 2, label: "Fair" },
        3 => PasswordStrength { level: 3, label: "Good" },
        4 => PasswordStrength { level: 4, label: "Strong" },
        _ => PasswordStrength { level: 5, label: "Very Strong" },
    }
}

// =============================================================================
// EMAIL CHECKS
// =============================================================================

/// `local@host.tld` with no whitespace and exactly one `@`.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, host)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && !host.contains('@')
        && host.split('.').count() >= 2
        && host.split('.').all(|label| !label.is_empty())
}

/// The address must live directly under the institution's domain.
#[must_use]
pub fn is_university_email(email: &str, domain: &str) -> bool {
    let Some((local, host)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && !local.chars().any(char::is_whitespace) && host.eq_ignore_ascii_case(domain)
}

// =============================================================================
// LOGIN
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    /// Presence and shape only. Password rules are the provider's business here.
    ///
    /// # Errors
    ///
    /// Returns the first failing field check.
    pub fn validate(&self) -> Result<Credentials, ValidationError> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(ValidationError::EmailRequired);
        }
        if !is_plausible_email(email) {
            return Err(ValidationError::EmailInvalid);
        }
        if self.password.is_empty() {
            return Err(ValidationError::PasswordRequired);
        }
        Ok(Credentials { email: email.to_owned(), password: self.password.clone() })
    }
}

/// Sign in and hand the new session to the manager.
///
/// # Errors
///
/// Validation failures, the provider's rejection message, or a generic
/// failure. The token store is untouched on every error path.
pub async fn submit_login(manager: &SessionManager, form: &LoginForm) -> Result<UserSummary, FormError> {
    let credentials = form.validate()?;
    let session = manager.gateway().sign_in(&credentials).await?;
    manager.establish(&session)?;
    Ok(session.user)
}

// =============================================================================
// REGISTER
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The provider sent a confirmation mail.
    CheckEmail { email: String },
    SignedIn(UserSummary),
}

impl RegisterForm {
    /// # Errors
    ///
    /// Returns the first failing field check.
    pub fn validate(&self, university_domain: &str) -> Result<SignUpRequest, ValidationError> {
        let name = self.full_name.trim();
        if name.is_empty() {
            return Err(ValidationError::FullNameRequired);
        }
        let email = self.email.trim();
        if !is_university_email(email, university_domain) {
            return Err(ValidationError::NotUniversityEmail { domain: university_domain.to_owned() });
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort);
        }
        if self.password != self.confirm_password {
            return Err(ValidationError::PasswordMismatch);
        }
        if password_strength(&self.password).level < MIN_PASSWORD_LEVEL {
            return Err(ValidationError::PasswordTooWeak);
        }
        Ok(SignUpRequest { name: name.to_owned(), email: email.to_lowercase(), password: self.password.clone() })
    }
}

/// Create the account. Providers that skip email confirmation return a
/// session right away, which is established like a login.
///
/// # Errors
///
/// Validation failures, the provider's rejection message (e.g. duplicate
/// account), or a generic failure.
pub async fn submit_register(
    manager: &SessionManager,
    form: &RegisterForm,
    university_domain: &str,
) -> Result<RegisterOutcome, FormError> {
    let request = form.validate(university_domain)?;
    match manager.gateway().sign_up(&request).await? {
        SignUpOutcome::PendingVerification { email } => {
            tracing::info!(%email, "sign-up pending email verification");
            Ok(RegisterOutcome::CheckEmail { email })
        }
        SignUpOutcome::SignedIn(session) => {
            manager.establish(&session)?;
            Ok(RegisterOutcome::SignedIn(session.user))
        }
    }
}

// =============================================================================
// PROFILE
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub name: String,
    pub bio: String,
    pub university_id: String,
    pub avatar_url: String,
}

impl ProfileForm {
    /// Prefill from the signed-in user.
    #[must_use]
    pub fn from_user(user: &UserSummary) -> Self {
        Self {
            name: user.name.clone(),
            bio: user.bio.clone().unwrap_or_default(),
            university_id: user.university_id.clone().unwrap_or_default(),
            avatar_url: user.avatar_url.clone().unwrap_or_default(),
        }
    }

    /// # Errors
    ///
    /// Returns the first failing field check.
    pub fn validate(&self) -> Result<ProfileUpdate, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::NameRequired);
        }
        if name.chars().count() < MIN_NAME_LEN {
            return Err(ValidationError::NameTooShort);
        }
        if self.bio.chars().count() > MAX_BIO_LEN {
            return Err(ValidationError::BioTooLong);
        }
        let optional = |s: &str| Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_owned);
        Ok(ProfileUpdate {
            name: name.to_owned(),
            bio: optional(&self.bio),
            university_id: optional(&self.university_id),
            avatar_url: optional(&self.avatar_url),
        })
    }
}

/// Save the profile, then patch the cached user with what the backend returned.
///
/// # Errors
///
/// Validation failures, the backend's message, `Unauthorized` after the
/// logout funnel ran, or a generic failure.
pub async fn submit_profile(
    manager: &SessionManager,
    api: &ApiClient,
    form: &ProfileForm,
) -> Result<UserSummary, FormError> {
    let update = form.validate()?;
    let user = api.update_profile(&update).await?;
    manager.apply_profile_update(user.clone());
    Ok(user)
}
