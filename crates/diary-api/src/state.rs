//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::blacklist::TokenBlacklist;
use crate::auth::cookies::CookieSettings;
use crate::auth::password::CredentialHasher;
use crate::auth::service::AuthService;
use crate::auth::transport::TransportPolicy;
use crate::metrics::Metrics;
use diary_core::{AppConfig, ConfigError, SqliteStore};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Credential and blacklist storage
    pub store: SqliteStore,
    /// Authentication service
    pub auth: AuthService,
    /// Session cookie attributes
    pub cookies: CookieSettings,
    /// Transport requirements for credential submission
    pub transport: TransportPolicy,
    /// Request and auth counters
    pub metrics: Metrics,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create application state over an opened store
    pub fn new(config: AppConfig, store: SqliteStore) -> Result<Self, ConfigError> {
        Self::with_hasher(config, store, CredentialHasher::default())
    }

    pub fn with_hasher(
        config: AppConfig,
        store: SqliteStore,
        hasher: CredentialHasher,
    ) -> Result<Self, ConfigError> {
        let transport = TransportPolicy::from_config(&config.transport)?;
        let shared = Arc::new(store.clone());
        let auth = AuthService::new(
            shared.clone(),
            TokenBlacklist::new(shared),
            &config.jwt,
            hasher,
        );
        let cookies = CookieSettings {
            secure: config.cookie_secure(),
            path: config.session.cookie_path.clone(),
            access_max_age: config.jwt.access_ttl_secs,
            refresh_max_age: config.jwt.refresh_ttl_secs,
        };

        Ok(Self {
            config,
            store,
            auth,
            cookies,
            transport,
            metrics: Metrics::new(),
            start_time: Instant::now(),
        })
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// State over an in-memory store with cheap password hashing
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn for_testing(config: AppConfig) -> Arc<Self> {
        use crate::auth::password::PasswordConfig;

        let store = SqliteStore::in_memory()
            .await
            .expect("Failed to open in-memory store");
        let hasher = CredentialHasher::new(PasswordConfig::fast());
        Arc::new(Self::with_hasher(config, store, hasher).expect("Invalid test configuration"))
    }
}
