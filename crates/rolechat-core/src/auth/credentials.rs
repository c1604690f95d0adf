use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::UserProfile;

use super::storage::KeyValueStorage;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const TOKEN_EXPIRY_KEY: &str = "token_expiry";
pub const USER_INFO_KEY: &str = "user_info";

/// Keys unrelated to auth that still must not outlive a logout.
pub const AUXILIARY_KEYS: [&str; 3] = ["user_preferences", "chat_history", "temp_data"];

/// Everything the credential store holds, as read back at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialRecord {
    pub token: Option<String>,
    /// Absolute expiry, epoch millis
    pub expiry: Option<i64>,
    pub user: Option<UserProfile>,
}

/// Persistent credential store on top of durable key-value storage.
///
/// No validation happens here. Storage failures are logged and swallowed:
/// losing a write costs the user a re-login, never a crash.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Store token, expiry and user together
    pub fn write(&self, token: &str, expiry: i64, user: &UserProfile) {
        self.write_token(token, expiry);
        self.write_user(user);
    }

    pub fn read(&self) -> CredentialRecord {
        CredentialRecord {
            token: self.read_token(),
            expiry: self.read_expiry(),
            user: self.read_user(),
        }
    }

    pub fn clear(&self) {
        self.clear_token();
        self.clear_user();
    }

    /// Token and expiry are written as a pair, expiry first.
    ///
    /// If the pair cannot be stored, neither key is left behind: a token
    /// without an expiry would never expire.
    pub fn write_token(&self, token: &str, expiry: i64) {
        let expiry = expiry.to_string();
        let entries = [(TOKEN_EXPIRY_KEY, expiry.as_str()), (ACCESS_TOKEN_KEY, token)];
        if let Err(e) = self.storage.set_many(&entries) {
            warn!(error = %e, "Storage write failed, discarding partial token");
            self.clear_token();
        }
    }

    pub fn clear_token(&self) {
        self.remove(ACCESS_TOKEN_KEY);
        self.remove(TOKEN_EXPIRY_KEY);
    }

    pub fn write_user(&self, user: &UserProfile) {
        match serde_json::to_string(user) {
            Ok(json) => self.set(USER_INFO_KEY, &json),
            Err(e) => warn!(error = %e, "Failed to serialize user profile"),
        }
    }

    pub fn clear_user(&self) {
        self.remove(USER_INFO_KEY);
    }

    pub fn read_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    pub fn read_expiry(&self) -> Option<i64> {
        let raw = self.get(TOKEN_EXPIRY_KEY)?;
        match raw.trim().parse::<i64>() {
            Ok(expiry) => Some(expiry),
            Err(_) => {
                warn!(value = %raw, "Ignoring malformed token expiry");
                None
            }
        }
    }

    /// Cached profile; an unparseable entry is dropped from storage
    pub fn read_user(&self) -> Option<UserProfile> {
        let raw = self.get(USER_INFO_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Discarding unparseable cached user profile");
                self.remove(USER_INFO_KEY);
                None
            }
        }
    }

    /// Remove the auxiliary keys that are present
    pub fn clear_auxiliary(&self) {
        for key in AUXILIARY_KEYS {
            if self.get(key).is_some() {
                debug!(key, "Removing auxiliary key");
                self.remove(key);
            }
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Storage read failed");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            warn!(key, error = %e, "Storage write failed");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            warn!(key, error = %e, "Storage remove failed");
        }
    }
}
