//! Session manager - login, registration, logout and session restore.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::models::{LoginCredentials, LoginResponse, NewUser, RegisterResponse, UserProfile};
use crate::router::Navigator;

use super::error::SessionError;
use super::session::{Session, SessionState};
use super::storage::KeyValueStorage;

/// Delay before the post-logout page load, so state clearing settles first.
pub const LOGOUT_REDIRECT_DELAY: Duration = Duration::from_millis(100);

/// Where logout sends the user.
const ROOT_PATH: &str = "/";

/// Marks the session initialized when dropped, whatever path initialization
/// took (including cancellation of the future).
struct InitializedOnDrop<'a>(&'a SessionState);

impl Drop for InitializedOnDrop<'_> {
    fn drop(&mut self) {
        self.0.mark_initialized();
    }
}

/// Owns the session lifecycle. All state changes go through
/// [`SessionState`], which writes them through to durable storage.
pub struct SessionManager {
    state: SessionState,
    api: ApiClient,
    /// Session-scoped scratch storage, wiped on logout
    transient: Arc<dyn KeyValueStorage>,
    navigator: Arc<dyn Navigator>,
    refresh_path: Option<String>,
    init_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        state: SessionState,
        api: ApiClient,
        transient: Arc<dyn KeyValueStorage>,
        navigator: Arc<dyn Navigator>,
        refresh_path: Option<String>,
    ) -> Self {
        Self {
            state,
            api,
            transient,
            navigator,
            refresh_path,
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn snapshot(&self) -> Session {
        self.state.snapshot()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.user()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// Whether the user is signed in.
    ///
    /// An expired session is cleared as part of the check, so after this
    /// returns `false` for an expired token, token and user are gone too.
    pub fn is_logged_in(&self) -> bool {
        self.state.check_logged_in()
    }

    /// Token present and unexpired; clears an expired session.
    pub fn check_token_validity(&self) -> bool {
        self.state.check_token_validity()
    }

    /// Restore the stored session and revalidate it with the backend.
    ///
    /// Runs once; later and concurrent calls wait for the first and return.
    pub async fn initialize(&self) {
        let _running = self.init_lock.lock().await;
        if self.state.is_initialized() {
            debug!("Session already initialized");
            return;
        }
        let _done = InitializedOnDrop(&self.state);

        self.state.restore_from_store();

        if self.state.token().is_some() && self.state.check_token_validity() {
            match self.fetch_current_user().await {
                Ok(Some(user)) => info!(user = %user.display_name(), "Session restored"),
                Ok(None) => debug!("Token vanished during restore"),
                Err(e) => {
                    error!(error = %e, "Failed to restore session");
                    self.state.clear_auth();
                }
            }
        } else {
            debug!("No usable stored token");
            self.state.clear_auth();
        }
    }

    /// Fetch the profile for the current token and store it.
    ///
    /// Returns `None` without a token. On failure token and user are cleared
    /// before the error is returned.
    pub async fn fetch_current_user(&self) -> Result<Option<UserProfile>> {
        if self.state.token().is_none() {
            return Ok(None);
        }

        let _loading = self.state.begin_loading();
        match self.api.current_user().await {
            Ok(user) => {
                self.state.set_user(user.clone());
                Ok(Some(user))
            }
            Err(e) => {
                self.state.clear_token();
                self.state.clear_user();
                Err(e).context("Failed to fetch current user")
            }
        }
    }

    /// Sign in, then load the fresh profile.
    ///
    /// Any failure leaves the session fully cleared and is returned to the
    /// caller.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse> {
        info!(email = %credentials.email, "Logging in");
        let _loading = self.state.begin_loading();

        match self.try_login(credentials).await {
            Ok(response) => {
                info!("Login successful");
                Ok(response)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.state.clear_auth();
                Err(e)
            }
        }
    }

    async fn try_login(&self, credentials: &LoginCredentials) -> Result<LoginResponse> {
        let response = self.api.login(credentials).await.context("Login request failed")?;

        if let Some(ref token) = response.access_token {
            self.state.set_token(token, response.expires_in);
            self.fetch_current_user().await?;
        }

        Ok(response)
    }

    /// Create an account. A token in the response signs the user in directly.
    pub async fn register(&self, new_user: &NewUser) -> Result<RegisterResponse> {
        info!(email = %new_user.email, username = %new_user.username, "Registering");
        let _loading = self.state.begin_loading();

        let response = self.api.register(new_user).await.context("Registration failed")?;

        if let Some(ref token) = response.access_token {
            self.state.set_token(token, None);
            if let Some(ref user) = response.user {
                self.state.set_user(user.clone());
            }
        }

        Ok(response)
    }

    /// Sign out locally whatever the backend says.
    ///
    /// The backend call is best effort. Afterwards credentials, auxiliary keys
    /// and transient storage are cleared, and a full page load to `/` is
    /// scheduled after [`LOGOUT_REDIRECT_DELAY`] unless already there.
    pub async fn logout(&self) {
        info!("Logging out");
        {
            let _loading = self.state.begin_loading();
            if self.state.token().is_some() {
                if let Err(e) = self.api.logout().await {
                    warn!(error = %e, "Backend logout failed, clearing local session anyway");
                }
            }
        }

        self.state.clear_auth();
        self.state.store().clear_auxiliary();
        if let Err(e) = self.transient.clear() {
            warn!(error = %e, "Failed to clear transient storage");
        }

        if self.navigator.current_path() != ROOT_PATH {
            let navigator = Arc::clone(&self.navigator);
            tokio::spawn(async move {
                tokio::time::sleep(LOGOUT_REDIRECT_DELAY).await;
                navigator.hard_navigate(ROOT_PATH);
            });
        }
    }

    /// Renew the access token.
    ///
    /// Returns `Ok(false)` when there is no token to renew. Backends without
    /// a renewal endpoint yield [`SessionError::RefreshUnsupported`] and the
    /// session is left as is. A failed renewal clears the session.
    pub async fn refresh_token(&self) -> Result<bool> {
        if self.state.token().is_none() {
            return Ok(false);
        }

        let Some(path) = self.refresh_path.as_deref() else {
            warn!("Token refresh requested but no renewal endpoint is configured");
            return Err(SessionError::RefreshUnsupported.into());
        };

        match self.api.refresh_token(path).await {
            Ok(LoginResponse {
                access_token: Some(token),
                expires_in,
                ..
            }) => {
                self.state.set_token(&token, expires_in);
                info!("Token refreshed");
                Ok(true)
            }
            Ok(_) => {
                error!("Token refresh response had no token");
                self.state.clear_auth();
                Err(SessionError::MissingToken.into())
            }
            Err(e) => {
                error!(error = %e, "Token refresh failed");
                self.state.clear_auth();
                Err(e).context("Token refresh failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::auth::credentials::{ACCESS_TOKEN_KEY, TOKEN_EXPIRY_KEY, USER_INFO_KEY};
    use crate::auth::session::now_millis;
    use crate::auth::{CredentialStore, FileStorage, MemoryStorage};
    use crate::router::MemoryNavigator;
    use mockito::{Matcher, Server};

    const USER_JSON: &str = r#"{"id":"u1","username":"mei","email":"mei@example.com","created_at":"2024-05-01T10:00:00"}"#;

    struct Harness {
        manager: Arc<SessionManager>,
        storage: Arc<MemoryStorage>,
        transient: Arc<MemoryStorage>,
        navigator: Arc<MemoryNavigator>,
    }

    fn harness_with(base_url: &str, storage: Arc<MemoryStorage>, start: &str, refresh: Option<&str>) -> Harness {
        let state = SessionState::new(CredentialStore::new(storage.clone()));
        let navigator = Arc::new(MemoryNavigator::new(start));
        let transient = Arc::new(MemoryStorage::new());
        let api = ApiClient::new(base_url, Duration::from_secs(10), state.clone(), navigator.clone())
            .expect("client builds");
        let manager = Arc::new(SessionManager::new(
            state,
            api,
            transient.clone(),
            navigator.clone(),
            refresh.map(str::to_string),
        ));
        Harness {
            manager,
            storage,
            transient,
            navigator,
        }
    }

    fn harness(base_url: &str) -> Harness {
        harness_with(base_url, Arc::new(MemoryStorage::new()), "/", None)
    }

    fn seed_session(storage: &MemoryStorage, expiry: i64) {
        storage.set(ACCESS_TOKEN_KEY, "stored-token").unwrap();
        storage.set(TOKEN_EXPIRY_KEY, &expiry.to_string()).unwrap();
        storage.set(USER_INFO_KEY, USER_JSON).unwrap();
    }

    fn credentials() -> LoginCredentials {
        LoginCredentials {
            email: "mei@example.com".to_string(),
            password: "hunter22".to_string(),
        }
    }

    #[tokio::test]
    async fn test_initialize_revalidates_once() {
        let mut server = Server::new_async().await;
        let me = server
            .mock("GET", "/auth/me")
            .match_header("authorization", "Bearer stored-token")
            .with_status(200)
            .with_body(USER_JSON)
            .expect(1)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        seed_session(&storage, now_millis() + 60_000);
        let h = harness_with(&server.url(), storage, "/", None);

        h.manager.initialize().await;
        h.manager.initialize().await;

        me.assert_async().await;
        assert!(h.manager.is_initialized());
        assert!(h.manager.is_logged_in());
    }

    #[tokio::test]
    async fn test_concurrent_initialize_revalidates_once() {
        let mut server = Server::new_async().await;
        let me = server
            .mock("GET", "/auth/me")
            .with_status(200)
            .with_body(USER_JSON)
            .expect(1)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        seed_session(&storage, now_millis() + 60_000);
        let h = harness_with(&server.url(), storage, "/", None);

        futures::future::join(h.manager.initialize(), h.manager.initialize()).await;
        me.assert_async().await;
        assert!(h.manager.is_logged_in());
    }

    #[tokio::test]
    async fn test_initialize_with_expired_token_skips_backend() {
        let mut server = Server::new_async().await;
        let me = server.mock("GET", "/auth/me").expect(0).create_async().await;

        let storage = Arc::new(MemoryStorage::new());
        seed_session(&storage, now_millis() - 1_000);
        let h = harness_with(&server.url(), storage.clone(), "/", None);

        h.manager.initialize().await;

        me.assert_async().await;
        assert!(h.manager.is_initialized());
        assert!(!h.manager.is_logged_in());
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(USER_INFO_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_initialize_revalidation_failure_clears_session() {
        let mut server = Server::new_async().await;
        let _me = server
            .mock("GET", "/auth/me")
            .with_status(503)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        seed_session(&storage, now_millis() + 60_000);
        let h = harness_with(&server.url(), storage.clone(), "/", None);

        h.manager.initialize().await;

        assert!(h.manager.is_initialized());
        let session = h.manager.snapshot();
        assert!(session.token.is_none());
        assert!(session.user.is_none());
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_initialize_unreachable_backend_still_completes() {
        let storage = Arc::new(MemoryStorage::new());
        seed_session(&storage, now_millis() + 60_000);
        let h = harness_with("http://127.0.0.1:1", storage, "/", None);

        h.manager.initialize().await;
        assert!(h.manager.is_initialized());
        assert!(!h.manager.is_logged_in());
    }

    #[tokio::test]
    async fn test_login_stores_token_and_profile() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/auth/login")
            .match_body(Matcher::Json(serde_json::json!({
                "email": "mei@example.com",
                "password": "hunter22"
            })))
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","token_type":"bearer","expires_in":3600}"#)
            .create_async()
            .await;
        let me = server
            .mock("GET", "/auth/me")
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(USER_JSON)
            .create_async()
            .await;

        let h = harness(&server.url());
        let before = now_millis();
        let response = h.manager.login(&credentials()).await.expect("login succeeds");

        login.assert_async().await;
        me.assert_async().await;
        assert_eq!(response.access_token.as_deref(), Some("fresh"));
        assert!(h.manager.is_logged_in());
        assert!(!h.manager.is_loading());

        let expiry: i64 = h.storage.get(TOKEN_EXPIRY_KEY).unwrap().unwrap().parse().unwrap();
        assert!(expiry >= before + 3_600_000);
        assert!(expiry <= now_millis() + 3_600_000);
        assert!(h.storage.get(USER_INFO_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_login_with_unreadable_storage_file() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","expires_in":3600}"#)
            .create_async()
            .await;
        let me = server
            .mock("GET", "/auth/me")
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(USER_JSON)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
        std::fs::write(storage.path(), "{trunc").unwrap();

        let state = SessionState::new(CredentialStore::new(storage.clone()));
        let navigator = Arc::new(MemoryNavigator::default());
        let api = ApiClient::new(&server.url(), Duration::from_secs(10), state.clone(), navigator.clone())
            .expect("client builds");
        let manager = SessionManager::new(state, api, Arc::new(MemoryStorage::new()), navigator, None);

        manager.login(&credentials()).await.expect("login succeeds");

        me.assert_async().await;
        assert!(manager.is_logged_in());
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_login_rejected_clears_and_propagates() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(422)
            .with_body(r#"{"detail":"value is not a valid email address"}"#)
            .create_async()
            .await;

        let h = harness(&server.url());
        // Leftovers from an earlier session
        h.manager.state().set_token("old", None);

        let err = h.manager.login(&credentials()).await.expect_err("login fails");
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::BadRequest(_))));
        assert!(h.manager.snapshot().token.is_none());
        assert_eq!(h.storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(h.storage.get(TOKEN_EXPIRY_KEY).unwrap(), None);
        assert!(!h.manager.is_loading());
    }

    #[tokio::test]
    async fn test_login_profile_failure_leaves_no_partial_session() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"access_token":"fresh"}"#)
            .create_async()
            .await;
        let _me = server
            .mock("GET", "/auth/me")
            .with_status(500)
            .create_async()
            .await;

        let h = harness(&server.url());
        let err = h.manager.login(&credentials()).await.expect_err("profile fetch fails");
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::ServerError(_))));

        let session = h.manager.snapshot();
        assert!(session.token.is_none());
        assert!(session.user.is_none());
        assert_eq!(h.storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_register_with_token_skips_profile_fetch() {
        let mut server = Server::new_async().await;
        let _register = server
            .mock("POST", "/auth/register")
            .with_status(200)
            .with_body(format!(r#"{{"access_token":"new-user-token","user":{}}}"#, USER_JSON))
            .create_async()
            .await;
        let me = server.mock("GET", "/auth/me").expect(0).create_async().await;

        let h = harness(&server.url());
        let new_user = NewUser {
            username: "mei".to_string(),
            email: "mei@example.com".to_string(),
            password: "hunter22".to_string(),
        };
        h.manager.register(&new_user).await.expect("register succeeds");

        me.assert_async().await;
        assert!(h.manager.is_logged_in());
        assert_eq!(h.storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("new-user-token"));
    }

    #[tokio::test]
    async fn test_register_without_token_leaves_session_empty() {
        let mut server = Server::new_async().await;
        let _register = server
            .mock("POST", "/auth/register")
            .with_status(200)
            .with_body(r#"{"success":true,"message":"registered","data":{"user_id":"u1"}}"#)
            .create_async()
            .await;

        let h = harness(&server.url());
        let new_user = NewUser {
            username: "mei".to_string(),
            email: "mei@example.com".to_string(),
            password: "hunter22".to_string(),
        };
        let response = h.manager.register(&new_user).await.expect("register succeeds");
        assert_eq!(response.message.as_deref(), Some("registered"));
        assert!(!h.manager.is_logged_in());
    }

    #[tokio::test]
    async fn test_logout_offline_still_clears_everything() {
        let storage = Arc::new(MemoryStorage::new());
        seed_session(&storage, now_millis() + 60_000);
        storage.set("chat_history", "[]").unwrap();
        storage.set("user_preferences", "{}").unwrap();
        let h = harness_with("http://127.0.0.1:1", storage.clone(), "/characters/create", None);
        h.transient.set("draft", "hello").unwrap();

        h.manager.logout().await;

        assert!(!h.manager.is_logged_in());
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(TOKEN_EXPIRY_KEY).unwrap(), None);
        assert_eq!(storage.get(USER_INFO_KEY).unwrap(), None);
        assert_eq!(storage.get("chat_history").unwrap(), None);
        assert_eq!(storage.get("user_preferences").unwrap(), None);
        assert!(h.transient.is_empty());
        assert!(!h.manager.is_loading());

        // Navigation is deferred
        assert!(h.navigator.hard_navigations().is_empty());
        tokio::time::sleep(LOGOUT_REDIRECT_DELAY * 3).await;
        assert_eq!(h.navigator.hard_navigations(), vec!["/".to_string()]);
    }

    #[tokio::test]
    async fn test_logout_at_root_does_not_navigate() {
        let mut server = Server::new_async().await;
        let logout = server
            .mock("POST", "/auth/logout")
            .match_header("authorization", "Bearer stored-token")
            .with_status(200)
            .with_body(r#"{"success":true,"message":"bye"}"#)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        seed_session(&storage, now_millis() + 60_000);
        let h = harness_with(&server.url(), storage, "/", None);

        h.manager.logout().await;
        logout.assert_async().await;

        tokio::time::sleep(LOGOUT_REDIRECT_DELAY * 3).await;
        assert!(h.navigator.hard_navigations().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_without_endpoint_is_unsupported() {
        let h = harness("http://127.0.0.1:1");
        assert!(!h.manager.refresh_token().await.expect("no token is not an error"));

        h.manager.state().set_token("tok", None);
        let err = h.manager.refresh_token().await.expect_err("unsupported");
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::RefreshUnsupported)
        ));
        // Nothing failed, so nothing was cleared
        assert_eq!(h.manager.snapshot().token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_refresh_with_endpoint() {
        let mut server = Server::new_async().await;
        let _refresh = server
            .mock("POST", "/auth/refresh")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"access_token":"renewed","expires_in":120}"#)
            .create_async()
            .await;

        let h = harness_with(&server.url(), Arc::new(MemoryStorage::new()), "/", Some("/auth/refresh"));
        h.manager.state().set_token("tok", None);

        assert!(h.manager.refresh_token().await.expect("renewed"));
        assert_eq!(h.storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("renewed"));
        let expiry = h.manager.snapshot().token_expiry.expect("expiry set");
        assert!(expiry <= now_millis() + 120_000);
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session() {
        let mut server = Server::new_async().await;
        let _refresh = server
            .mock("POST", "/auth/refresh")
            .with_status(500)
            .create_async()
            .await;

        let h = harness_with(&server.url(), Arc::new(MemoryStorage::new()), "/", Some("/auth/refresh"));
        h.manager.state().set_token("tok", None);

        assert!(h.manager.refresh_token().await.is_err());
        assert!(h.manager.snapshot().token.is_none());
    }

    #[tokio::test]
    async fn test_session_survives_reload() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","expires_in":3600}"#)
            .create_async()
            .await;
        let _me = server
            .mock("GET", "/auth/me")
            .with_status(200)
            .with_body(USER_JSON)
            .expect_at_least(2)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let first = harness_with(&server.url(), storage.clone(), "/login", None);
        first.manager.login(&credentials()).await.expect("login succeeds");
        let expiry = first.manager.snapshot().token_expiry;

        // A new process on the same storage
        let second = harness_with(&server.url(), storage, "/", None);
        second.manager.initialize().await;
        assert!(second.manager.is_logged_in());
        assert_eq!(second.manager.snapshot().token_expiry, expiry);
    }
}
