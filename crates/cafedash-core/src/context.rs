//! Wiring of the session components.
//!
//! One `AuthContext` is built at app boot and handed to whatever needs the
//! session; there is no global.

use std::sync::Arc;

use thiserror::Error;

use crate::api::{ApiClient, SessionClient, TransportError};
use crate::auth::{AuthBackend, CredentialStore, Navigator, RouteGuard, SessionManager};
use crate::config::{Config, ConfigError};

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create HTTP client: {0}")]
    Http(#[from] TransportError),
}

#[derive(Clone)]
pub struct AuthContext {
    pub session: Arc<SessionManager>,
    pub client: SessionClient,
}

impl AuthContext {
    /// Build the configured store, transport, session manager and client.
    pub fn from_config(config: &Config) -> Result<Self, ContextError> {
        let store = config.credential_store()?;
        let api = ApiClient::from_config(config)?;
        Ok(Self::with_parts(store, api))
    }

    /// Assemble from explicit parts, e.g. a substitute store in tests.
    pub fn with_parts(store: Arc<dyn CredentialStore>, api: ApiClient) -> Self {
        let backend: Arc<dyn AuthBackend> = Arc::new(api.clone());
        let session = Arc::new(SessionManager::new(store, backend));
        let client = SessionClient::new(api, session.clone());
        Self { session, client }
    }

    /// Mount a route guard around a protected route group.
    pub fn guard<N: Navigator>(&self, navigator: N) -> RouteGuard<N> {
        RouteGuard::mount(&self.session, navigator)
    }

    /// App teardown.
    pub fn shutdown(&self) {
        self.session.shutdown();
    }
}
