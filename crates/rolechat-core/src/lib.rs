//! Rolechat Core Library
//!
//! Client core for the rolechat AI character chat service: authentication
//! state, the shared HTTP pipeline, credential storage, and the navigation
//! guard that enforces per-route access rules.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod models;
pub mod router;

pub use api::{ApiClient, ApiError};
pub use auth::{SessionError, SessionManager, SessionState};
pub use config::Config;
pub use context::AppContext;
pub use router::{MemoryNavigator, NavigationOutcome, Navigator, Router};
