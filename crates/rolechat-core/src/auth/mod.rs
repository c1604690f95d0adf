//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `KeyValueStorage`: durable string storage (file, OS keyring, memory)
//! - `CredentialStore`: token, expiry and cached profile on top of storage
//! - `SessionState`: the shared in-memory session, written through to storage
//! - `SessionManager`: login, registration, logout and startup restore
//!
//! Tokens without a stated lifetime expire 24 hours after issue. Expiry is
//! enforced lazily, whenever login status is checked.

pub mod credentials;
pub mod error;
pub mod manager;
pub mod session;
pub mod storage;

pub use credentials::{CredentialRecord, CredentialStore, AUXILIARY_KEYS};
pub use error::SessionError;
pub use manager::{SessionManager, LOGOUT_REDIRECT_DELAY};
pub use session::{Session, SessionState, DEFAULT_TOKEN_LIFETIME_SECS};
pub use storage::{FileStorage, KeyValueStorage, KeyringStorage, MemoryStorage};
