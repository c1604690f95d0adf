//! REST API client module for the rolechat backend.
//!
//! This module provides the `ApiClient`, the single outbound request
//! pipeline. It attaches the stored bearer token to every call and reacts
//! to authorization failures by clearing the session.

pub mod client;
pub mod error;

pub use client::{ApiClient, DEFAULT_REQUEST_TIMEOUT_SECS, LOGIN_PATH};
pub use error::ApiError;
