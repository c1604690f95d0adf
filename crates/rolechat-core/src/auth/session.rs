use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::UserProfile;

use super::credentials::CredentialStore;

/// Token lifetime when the backend does not state one (24 hours).
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn expiry_datetime(epoch_millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(epoch_millis)
}

/// Absolute expiry for a token issued now.
///
/// A missing or zero lifetime falls back to the 24 hour default.
pub fn expiry_from_lifetime(expires_in: Option<i64>, now: i64) -> i64 {
    let secs = match expires_in {
        Some(secs) if secs != 0 => secs,
        _ => DEFAULT_TOKEN_LIFETIME_SECS,
    };
    now + secs * 1000
}

/// Authentication state of the running application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub token: Option<String>,
    /// Epoch millis
    pub token_expiry: Option<i64>,
    pub user: Option<UserProfile>,
    pub is_initialized: bool,
    loading_depth: u32,
}

impl Session {
    pub fn is_loading(&self) -> bool {
        self.loading_depth > 0
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.token_expiry, Some(expiry) if now > expiry)
    }

    /// Token and user present, and no expiry or not yet past it
    pub fn is_logged_in_at(&self, now: i64) -> bool {
        self.token.is_some() && self.user.is_some() && !self.is_expired_at(now)
    }

    fn clear_auth(&mut self) {
        self.token = None;
        self.token_expiry = None;
        self.user = None;
    }
}

struct Inner {
    session: Mutex<Session>,
    store: CredentialStore,
}

/// Shared session context.
///
/// Created once at bootstrap and handed to the HTTP client, the session
/// manager and the router. It is never torn down, only cleared in place.
/// Every mutator writes through to the credential store while holding the
/// session lock, so memory and storage change together.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Inner>,
}

impl SessionState {
    /// Picks up a previously stored token; expiry and user are restored by
    /// [`SessionState::restore_from_store`] during initialization.
    pub fn new(store: CredentialStore) -> Self {
        let session = Session {
            token: store.read_token(),
            ..Session::default()
        };
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                store,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    pub fn token_expiry(&self) -> Option<i64> {
        self.lock().token_expiry
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.lock().user.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_initialized
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading()
    }

    pub(crate) fn mark_initialized(&self) {
        self.lock().is_initialized = true;
    }

    /// Store a token and its absolute expiry, in memory and on disk.
    ///
    /// Returns the expiry that was recorded.
    pub fn set_token(&self, token: &str, expires_in: Option<i64>) -> i64 {
        let expiry = expiry_from_lifetime(expires_in, now_millis());
        let mut session = self.lock();
        session.token = Some(token.to_string());
        session.token_expiry = Some(expiry);
        self.inner.store.write_token(token, expiry);
        debug!(expiry, "Token stored");
        expiry
    }

    pub fn clear_token(&self) {
        let mut session = self.lock();
        session.token = None;
        session.token_expiry = None;
        self.inner.store.clear_token();
    }

    pub fn set_user(&self, user: UserProfile) {
        let mut session = self.lock();
        self.inner.store.write_user(&user);
        session.user = Some(user);
    }

    pub fn clear_user(&self) {
        let mut session = self.lock();
        session.user = None;
        self.inner.store.clear_user();
    }

    /// Drop token, expiry and user from memory and storage
    pub fn clear_auth(&self) {
        let mut session = self.lock();
        session.clear_auth();
        self.inner.store.clear();
    }

    /// Load the stored expiry and cached user into memory
    pub(crate) fn restore_from_store(&self) {
        let expiry = self.inner.store.read_expiry();
        let user = self.inner.store.read_user();
        let mut session = self.lock();
        if expiry.is_some() {
            session.token_expiry = expiry;
        }
        if user.is_some() {
            session.user = user;
        }
    }

    /// Evaluate login status, clearing the session if its token has expired.
    ///
    /// This is a state transition, not a plain read: an expired session is
    /// torn down before `false` is returned. The check and the clear happen
    /// under one lock.
    pub fn check_logged_in(&self) -> bool {
        let now = now_millis();
        let mut session = self.lock();
        if session.token.is_none() || session.user.is_none() {
            return false;
        }
        if session.is_expired_at(now) {
            info!("Session expired, clearing credentials");
            session.clear_auth();
            self.inner.store.clear();
            return false;
        }
        true
    }

    /// Like [`SessionState::check_logged_in`] but only requires a token.
    pub fn check_token_validity(&self) -> bool {
        let now = now_millis();
        let mut session = self.lock();
        if session.token.is_none() {
            return false;
        }
        if session.is_expired_at(now) {
            info!("Token expired, clearing credentials");
            session.clear_auth();
            self.inner.store.clear();
            return false;
        }
        true
    }

    /// Mark the session busy until the returned guard is dropped.
    pub fn begin_loading(&self) -> LoadingGuard {
        self.lock().loading_depth += 1;
        LoadingGuard {
            state: self.clone(),
        }
    }
}

/// Keeps `is_loading` set while alive; nested guards stack.
pub struct LoadingGuard {
    state: SessionState,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let mut session = self.state.lock();
        session.loading_depth = session.loading_depth.saturating_sub(1);
    }
}
