//! Session manager: the single source of truth for "who is signed in".
//!
//! ARCHITECTURE
//! ============
//! ```text
//!   Booting ──no token──▶ Unauthenticated ◀──────────────┐
//!      │                        ▲                         │
//!    token                 failure / logout         external clear
//!      ▼                        │                         │
//!   Hydrating ──success──▶ Authenticated ──refresh──▶ Hydrating
//! ```
//! State lives behind a mutex and is published as a [`SessionSnapshot`]
//! through a `watch` channel; callers only get read-only snapshots plus the
//! commands on [`SessionManager`].
//!
//! CONCURRENCY
//! ===========
//! - Hydrations for the same token while one is in flight share a single
//!   gateway call (`futures::future::Shared`).
//! - Every logout, establish, and external token change bumps an epoch. A
//!   hydration result is applied only if the epoch is unchanged and the
//!   stored token is still the one that was looked up, so a slow response can
//!   never resurrect a user after logout or show another account's profile.
//!   If the slot was rewritten with no event to announce it, the cached user
//!   is dropped and the current token is hydrated in the same call.
//! - After [`SessionManager::shutdown`] in-flight results are dropped.

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;

use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::UnauthorizedHandler;
use crate::gateway::{GatewayError, IdentityGateway};
use crate::routes::{LOGIN_PATH, RoutePolicy};
use crate::token_store::{SlotKey, StorageEvent, StoreError, TokenStore};
use crate::types::{Session, UserSummary};

// =============================================================================
// SNAPSHOT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Booting,
    Hydrating,
    Authenticated,
    Unauthenticated,
}

/// Read-only view of the session handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub user: Option<UserSummary>,
    pub loading: bool,
}

impl SessionSnapshot {
    fn booting() -> Self {
        Self { phase: SessionPhase::Booting, user: None, loading: true }
    }

    fn unauthenticated() -> Self {
        Self { phase: SessionPhase::Unauthenticated, user: None, loading: false }
    }

    fn authenticated(user: UserSummary) -> Self {
        Self { phase: SessionPhase::Authenticated, user: Some(user), loading: false }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

// =============================================================================
// NAVIGATION
// =============================================================================

/// Where the UI currently is, and how to send it somewhere else.
pub trait Navigator: Send + Sync {
    fn location(&self) -> String;
    fn redirect(&self, to: &str);
}

/// Navigator that records every location it was sent to.
pub struct MemoryNavigator {
    history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    #[must_use]
    pub fn new(initial: &str) -> Self {
        Self { history: Mutex::new(vec![initial.to_owned()]) }
    }

    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Navigator for MemoryNavigator {
    fn location(&self) -> String {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .unwrap_or_else(|| "/".to_owned())
    }

    fn redirect(&self, to: &str) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(to.to_owned());
    }
}

// =============================================================================
// MANAGER
// =============================================================================

type UserLookup = Shared<BoxFuture<'static, Result<UserSummary, GatewayError>>>;

struct InFlight {
    token: String,
    epoch: u64,
    lookup: UserLookup,
}

struct Inner {
    snapshot: SessionSnapshot,
    epoch: u64,
    in_flight: Option<InFlight>,
    booted: bool,
    disposed: bool,
}

pub struct SessionManager {
    gateway: Arc<dyn IdentityGateway>,
    store: TokenStore,
    navigator: Arc<dyn Navigator>,
    policy: RoutePolicy,
    inner: Mutex<Inner>,
    snapshots: watch::Sender<SessionSnapshot>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn IdentityGateway>,
        store: TokenStore,
        navigator: Arc<dyn Navigator>,
        policy: RoutePolicy,
    ) -> Arc<Self> {
        let (snapshots, _) = watch::channel(SessionSnapshot::booting());
        Arc::new(Self {
            gateway,
            store,
            navigator,
            policy,
            inner: Mutex::new(Inner {
                snapshot: SessionSnapshot::booting(),
                epoch: 0,
                in_flight: None,
                booted: false,
                disposed: false,
            }),
            snapshots,
            listener: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot.clone()
    }

    /// Receive every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserSummary> {
        self.lock().snapshot.user.clone()
    }

    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn IdentityGateway> {
        &self.gateway
    }

    #[must_use]
    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    /// Hydrate from the stored token and start listening for changes made by
    /// other contexts. Only the first call does anything.
    pub async fn boot(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.booted || inner.disposed {
                return;
            }
            inner.booted = true;
        }
        self.spawn_storage_listener();

        match self.store.token() {
            Some(token) => {
                tracing::debug!("stored token found; hydrating session");
                self.hydrate(token).await;
            }
            None => {
                tracing::debug!("no stored token; session is anonymous");
                self.publish(SessionSnapshot::unauthenticated());
            }
        }
    }

    /// Re-fetch the current user for the stored token. No-op without a token.
    pub async fn refresh_user(&self) {
        if let Some(token) = self.store.token() {
            self.hydrate(token).await;
        }
    }

    /// Clear the token store, drop the user, and go to the login page.
    pub fn logout(&self) {
        {
            let mut inner = self.lock();
            inner.epoch += 1;
            inner.in_flight = None;
            if let Err(e) = self.store.clear() {
                tracing::error!(error = %e, "failed to clear token store on logout");
            }
            inner.snapshot = SessionSnapshot::unauthenticated();
            self.snapshots.send_replace(inner.snapshot.clone());
        }
        if self.navigator.location() != LOGIN_PATH {
            self.navigator.redirect(LOGIN_PATH);
        }
    }

    /// Persist a freshly issued session and mark it authenticated with the
    /// profile the gateway returned alongside it.
    ///
    /// # Errors
    ///
    /// Returns an error if the token store rejects the write; the in-memory
    /// state is left untouched in that case.
    pub fn establish(&self, session: &Session) -> Result<(), StoreError> {
        {
            let mut inner = self.lock();
            self.store.write(&session.access_token, Some(&session.user))?;
            inner.epoch += 1;
            inner.in_flight = None;
            inner.snapshot = SessionSnapshot::authenticated(session.user.clone());
            self.snapshots.send_replace(inner.snapshot.clone());
        }
        tracing::info!(user_id = %session.user.id, "session established");
        self.apply_redirects();
        Ok(())
    }

    /// Replace the cached profile after a successful profile update.
    /// Ignored unless the update is for the signed-in user.
    pub fn apply_profile_update(&self, user: UserSummary) {
        let mut inner = self.lock();
        let same_account = inner.snapshot.user.as_ref().is_some_and(|current| current.id == user.id);
        if !same_account {
            tracing::warn!(user_id = %user.id, "profile update for a different account ignored");
            return;
        }
        if let Some(token) = self.store.token() {
            if let Err(e) = self.store.write(&token, Some(&user)) {
                tracing::warn!(error = %e, "failed to cache updated profile");
            }
        }
        inner.snapshot = SessionSnapshot::authenticated(user);
        self.snapshots.send_replace(inner.snapshot.clone());
    }

    /// Move the UI to `path` and re-run the redirect rules.
    pub fn navigate(&self, path: &str) {
        self.navigator.redirect(path);
        self.apply_redirects();
    }

    /// Stop reacting to storage events and drop any result still in flight.
    pub fn shutdown(&self) {
        {
            let mut inner = self.lock();
            inner.disposed = true;
            inner.in_flight = None;
        }
        if let Some(handle) = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, snapshot: SessionSnapshot) {
        {
            let mut inner = self.lock();
            inner.snapshot = snapshot.clone();
            self.snapshots.send_replace(snapshot);
        }
        self.apply_redirects();
    }

    async fn hydrate(&self, mut token: String) {
        loop {
            let Some((lookup, epoch)) = self.start_lookup(&token) else {
                return;
            };
            let result = lookup.await;
            match self.finish_hydration(&token, epoch, result) {
                Some(current) => token = current,
                None => return,
            }
        }
    }

    /// Mark the session as hydrating and join or start the lookup for `token`.
    fn start_lookup(&self, token: &str) -> Option<(UserLookup, u64)> {
        let mut inner = self.lock();
        if inner.disposed {
            return None;
        }
        let epoch = inner.epoch;
        let lookup = match &inner.in_flight {
            Some(flight) if flight.token == token && flight.epoch == epoch => {
                tracing::debug!("joining in-flight hydration");
                flight.lookup.clone()
            }
            _ => {
                let gateway = Arc::clone(&self.gateway);
                let lookup_token = token.to_owned();
                let lookup = async move { gateway.current_user(&lookup_token).await }
                    .boxed()
                    .shared();
                inner.in_flight = Some(InFlight { token: token.to_owned(), epoch, lookup: lookup.clone() });
                lookup
            }
        };
        let user = inner.snapshot.user.clone();
        inner.snapshot = SessionSnapshot { phase: SessionPhase::Hydrating, user, loading: true };
        self.snapshots.send_replace(inner.snapshot.clone());
        Some((lookup, epoch))
    }

    /// Apply a lookup result. Returns the token to hydrate next when the
    /// stored token changed underneath the lookup.
    fn finish_hydration(&self, token: &str, epoch: u64, result: Result<UserSummary, GatewayError>) -> Option<String> {
        {
            let mut inner = self.lock();
            if inner.in_flight.as_ref().is_some_and(|f| f.token == token && f.epoch == epoch) {
                inner.in_flight = None;
            }
            if inner.disposed {
                tracing::debug!("hydration finished after shutdown; result dropped");
                return None;
            }
            if inner.epoch != epoch {
                tracing::debug!("stale hydration result discarded");
                return None;
            }
            let stored = self.store.token();
            if stored.as_deref() != Some(token) {
                // Rewritten without an event (another process, no watcher).
                tracing::debug!("stored token changed during hydration; result discarded");
                return match stored {
                    Some(current) => {
                        inner.snapshot = SessionSnapshot { phase: SessionPhase::Hydrating, user: None, loading: true };
                        self.snapshots.send_replace(inner.snapshot.clone());
                        Some(current)
                    }
                    None => {
                        inner.snapshot = SessionSnapshot::unauthenticated();
                        self.snapshots.send_replace(inner.snapshot.clone());
                        None
                    }
                };
            }
            if let Ok(user) = &result {
                tracing::info!(user_id = %user.id, "session hydrated");
                inner.snapshot = SessionSnapshot::authenticated(user.clone());
                self.snapshots.send_replace(inner.snapshot.clone());
            }
        }

        match result {
            Ok(_) => self.apply_redirects(),
            Err(e) => {
                tracing::warn!(error = %e, "hydration failed; signing out");
                self.logout();
            }
        }
        None
    }

    fn on_storage_event(&self, event: StorageEvent) -> Option<String> {
        if event.key != SlotKey::Token {
            return None;
        }
        let token = event.new_value.filter(|token| !token.is_empty());
        {
            let mut inner = self.lock();
            if inner.disposed {
                return None;
            }
            inner.epoch += 1;
            inner.in_flight = None;
            if token.is_some() {
                // The cached profile belongs to the previous token.
                inner.snapshot = SessionSnapshot { phase: SessionPhase::Hydrating, user: None, loading: true };
                self.snapshots.send_replace(inner.snapshot.clone());
            }
        }
        match token {
            Some(token) => {
                tracing::debug!(origin = ?event.origin, "token changed in another context");
                Some(token)
            }
            None => {
                tracing::debug!(origin = ?event.origin, "token cleared in another context");
                self.publish(SessionSnapshot::unauthenticated());
                None
            }
        }
    }

    fn spawn_storage_listener(self: &Arc<Self>) {
        let mut events = self.store.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if let Some(token) = manager.on_storage_event(event) {
                    manager.hydrate(token).await;
                }
            }
        });
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Signed-in users have no business on login/register.
    fn apply_redirects(&self) {
        let snapshot = self.snapshot();
        if snapshot.user.is_none() || snapshot.loading {
            return;
        }
        let location = self.navigator.location();
        if self.policy.is_auth_only(&location) {
            tracing::debug!(%location, to = self.policy.landing_path(), "leaving auth page");
            self.navigator.redirect(self.policy.landing_path());
        }
    }
}

impl UnauthorizedHandler for SessionManager {
    fn on_unauthorized(&self) {
        tracing::warn!("backend rejected the session token; signing out");
        self.logout();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}
