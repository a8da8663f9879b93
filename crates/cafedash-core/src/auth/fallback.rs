//! Keychain storage with an encrypted file fallback.
//!
//! Some platforms have no usable keychain: saving fails outright, or it
//! appears to succeed but nothing can be read back later. Every save is
//! therefore read back from the primary store; if the token did not stick,
//! it goes to the secondary store instead. Only one store holds the token at
//! a time.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{CredentialStore, StorageError};

pub struct FallbackStore {
    primary: Arc<dyn CredentialStore>,
    secondary: Arc<dyn CredentialStore>,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn CredentialStore>, secondary: Arc<dyn CredentialStore>) -> Self {
        Self { primary, secondary }
    }

    /// Save to the primary store and confirm it kept the token.
    async fn save_primary(&self, token: &str) -> Result<(), StorageError> {
        self.primary.save(token).await?;
        match self.primary.load().await? {
            Some(stored) if stored == token => Ok(()),
            _ => Err(StorageError::Unavailable(
                "keychain accepted the token but did not keep it".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CredentialStore for FallbackStore {
    async fn save(&self, token: &str) -> Result<(), StorageError> {
        match self.save_primary(token).await {
            Ok(()) => {
                if let Err(e) = self.secondary.clear().await {
                    debug!(error = %e, "Failed to clear fallback store");
                }
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Keychain save failed, using encrypted file fallback");
            }
        }

        self.secondary.save(token).await?;
        if let Err(e) = self.primary.clear().await {
            debug!(error = %e, "Failed to clear keychain entry");
        }
        info!("Session token saved to fallback store");
        Ok(())
    }

    async fn load(&self) -> Result<Option<String>, StorageError> {
        match self.primary.load().await {
            Ok(Some(token)) => return Ok(Some(token)),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Keychain load failed, trying fallback store"),
        }
        self.secondary.load().await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let primary = self.primary.clear().await;
        let secondary = self.secondary.clear().await;
        match (primary, secondary) {
            (_, Err(e)) => Err(e),
            // An unavailable keychain cannot be holding the token
            (Err(StorageError::Unavailable(reason)), Ok(())) => {
                debug!(reason = %reason, "Keychain unavailable during clear");
                Ok(())
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{EncryptedFileStore, KeyringStore, MemoryStore};

    /// Accepts every save and never returns anything, like a keychain
    /// without a platform backend.
    struct ForgetfulStore;

    #[async_trait]
    impl CredentialStore for ForgetfulStore {
        async fn save(&self, _token: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn load(&self) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        async fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn file_store(dir: &tempfile::TempDir) -> Arc<EncryptedFileStore> {
        Arc::new(EncryptedFileStore::new(dir.path(), "test passphrase"))
    }

    #[tokio::test]
    async fn test_working_keychain_holds_the_token() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::with_token("stale"));
        let store = FallbackStore::new(primary.clone(), secondary.clone());

        store.save("abc").await.unwrap();
        assert_eq!(primary.peek().as_deref(), Some("abc"));
        assert_eq!(secondary.peek(), None);
        assert_eq!(store.load().await, Ok(Some("abc".to_string())));
    }

    #[tokio::test]
    async fn test_forgetful_keychain_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FallbackStore::new(Arc::new(ForgetfulStore), file_store(&dir));
        store.save("abc").await.unwrap();

        // A fresh instance, as after a restart
        let restarted = FallbackStore::new(Arc::new(ForgetfulStore), file_store(&dir));
        assert_eq!(restarted.load().await, Ok(Some("abc".to_string())));

        restarted.clear().await.unwrap();
        assert_eq!(restarted.load().await, Ok(None));
    }

    #[tokio::test]
    async fn test_failing_keychain_falls_back() {
        let primary = Arc::new(MemoryStore::new());
        primary.fail_saves(true);
        primary.fail_loads(true);
        let secondary = Arc::new(MemoryStore::new());
        let store = FallbackStore::new(primary, secondary.clone());

        store.save("abc").await.unwrap();
        assert_eq!(secondary.peek().as_deref(), Some("abc"));
        assert_eq!(store.load().await, Ok(Some("abc".to_string())));
    }

    #[tokio::test]
    async fn test_both_stores_failing_is_an_error() {
        let primary = Arc::new(MemoryStore::new());
        primary.fail_saves(true);
        let secondary = Arc::new(MemoryStore::new());
        secondary.fail_saves(true);
        let store = FallbackStore::new(primary, secondary);

        assert!(store.save("abc").await.is_err());
    }

    #[tokio::test]
    async fn test_keychain_session_survives_restart() {
        // Whatever keychain this machine has, the token must come back
        // through a fresh instance.
        let dir = tempfile::tempdir().unwrap();
        let service = format!("cafedash-test-{}", std::process::id());
        let store = FallbackStore::new(
            Arc::new(KeyringStore::with_service(service.clone())),
            file_store(&dir),
        );
        store.save("abc").await.unwrap();

        let restarted = FallbackStore::new(
            Arc::new(KeyringStore::with_service(service)),
            file_store(&dir),
        );
        assert_eq!(restarted.load().await, Ok(Some("abc".to_string())));

        // A keychain that cannot be written may refuse the clear too
        let _ = restarted.clear().await;
    }
}
