//! Application bootstrap.
//!
//! Wiring order matters: the shared session state comes first, the HTTP
//! client is built with that state and the navigator, and the session
//! manager and router are layered on top. Nothing is late-bound.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::api::ApiClient;
use crate::auth::credentials::{ACCESS_TOKEN_KEY, TOKEN_EXPIRY_KEY, USER_INFO_KEY};
use crate::auth::{
    CredentialStore, FileStorage, KeyValueStorage, KeyringStorage, MemoryStorage, SessionManager,
    SessionState, AUXILIARY_KEYS,
};
use crate::config::{Config, StorageBackend};
use crate::router::{NavigationGuard, Navigator, RouteTable, Router};

/// Process-wide application services.
pub struct AppContext {
    pub config: Config,
    pub session: Arc<SessionManager>,
    pub api: ApiClient,
    pub router: Router,
}

impl AppContext {
    pub fn bootstrap(
        config: Config,
        storage: Arc<dyn KeyValueStorage>,
        transient: Arc<dyn KeyValueStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let state = SessionState::new(CredentialStore::new(storage));

        let api = ApiClient::new(
            &config.api_base_url,
            config.request_timeout(),
            state.clone(),
            Arc::clone(&navigator),
        )
        .context("Failed to create API client")?;

        let session = Arc::new(SessionManager::new(
            state,
            api.clone(),
            transient,
            Arc::clone(&navigator),
            config.refresh_path.clone(),
        ));

        let guard = NavigationGuard::new(Arc::clone(&session), RouteTable::default());
        let router = Router::new(guard, navigator, &config.app_name);

        info!(api = %config.api_base_url, "Application context ready");

        Ok(Self {
            config,
            session,
            api,
            router,
        })
    }

    /// Bootstrap with the durable storage backend named in the config and a
    /// fresh in-memory transient store.
    pub fn from_config(config: Config, navigator: Arc<dyn Navigator>) -> Result<Self> {
        let storage = open_storage(&config)?;
        Self::bootstrap(config, storage, Arc::new(MemoryStorage::new()), navigator)
    }
}

/// Durable storage for the backend named in the config
pub fn open_storage(config: &Config) -> Result<Arc<dyn KeyValueStorage>> {
    let storage: Arc<dyn KeyValueStorage> = match config.storage {
        StorageBackend::File => Arc::new(FileStorage::new(&config.storage_dir()?)?),
        StorageBackend::Keyring => {
            let keys = [ACCESS_TOKEN_KEY, TOKEN_EXPIRY_KEY, USER_INFO_KEY]
                .into_iter()
                .chain(AUXILIARY_KEYS);
            Arc::new(KeyringStorage::new(keys))
        }
    };
    Ok(storage)
}
