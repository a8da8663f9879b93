use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::StorageError;

/// Service name used for keychain entries
pub const SERVICE_NAME: &str = "cafedash";

/// The single well-known key the session token lives under
pub const TOKEN_KEY: &str = "session_token";

/// Durable persistence for the session token.
///
/// Implementations must tolerate `load` racing with `save` without handing
/// out a partially written value.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist the token, replacing any previous one.
    async fn save(&self, token: &str) -> Result<(), StorageError>;

    /// The last saved token, or `None` if nothing is stored.
    async fn load(&self) -> Result<Option<String>, StorageError>;

    /// Remove the stored token. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), StorageError>;
}

impl From<keyring::Error> for StorageError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoStorageAccess(e) => StorageError::Unavailable(e.to_string()),
            keyring::Error::PlatformFailure(e) => StorageError::Backend(e.to_string()),
            keyring::Error::BadEncoding(_) => {
                StorageError::Corrupt("stored token is not valid UTF-8".to_string())
            }
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Token storage in the OS keychain.
pub struct KeyringStore {
    service: String,
    key: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            key: TOKEN_KEY.to_string(),
        }
    }

    fn entry(service: &str, key: &str) -> Result<Entry, StorageError> {
        Entry::new(service, key).map_err(StorageError::from)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn save(&self, token: &str) -> Result<(), StorageError> {
        let (service, key, token) = (self.service.clone(), self.key.clone(), token.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            Self::entry(&service, &key)?.set_password(&token)?;
            debug!(service = %service, "Stored session token in keychain");
            Ok(())
        })
        .await?
    }

    async fn load(&self) -> Result<Option<String>, StorageError> {
        let (service, key) = (self.service.clone(), self.key.clone());
        tokio::task::spawn_blocking(move || -> Result<Option<String>, StorageError> {
            match Self::entry(&service, &key)?.get_password() {
                Ok(token) => Ok(Some(token)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(StorageError::from(e)),
            }
        })
        .await?
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let (service, key) = (self.service.clone(), self.key.clone());
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            match Self::entry(&service, &key)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(StorageError::from(e)),
            }
        })
        .await?
    }
}

/// In-process token storage.
///
/// Useful where nothing should outlive the process, and as a stand-in for
/// platform storage in tests. Each operation can be made to fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    token: Mutex<Option<String>>,
    fail_save: AtomicBool,
    fail_load: AtomicBool,
    fail_clear: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::default();
        *store.slot() = Some(token.into());
        store
    }

    /// Current contents, without going through the async contract
    pub fn peek(&self) -> Option<String> {
        self.slot().clone()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn fail_clears(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable(format!("{} failed", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn save(&self, token: &str) -> Result<(), StorageError> {
        Self::check(&self.fail_save, "save")?;
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    async fn load(&self) -> Result<Option<String>, StorageError> {
        Self::check(&self.fail_load, "load")?;
        Ok(self.slot().clone())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        Self::check(&self.fail_clear, "clear")?;
        *self.slot() = None;
        Ok(())
    }
}
