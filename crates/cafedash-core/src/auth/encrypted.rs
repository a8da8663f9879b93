//! Encrypted file-backed credential storage.
//!
//! Fallback for platforms without a usable keychain. The token is sealed with
//! ChaCha20-Poly1305 under a key derived by Argon2 from a passphrase and a
//! fresh random salt on every write.
//!
//! File layout: `salt (16) || nonce (12) || ciphertext`.

use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use tracing::debug;

use super::{CredentialStore, StorageError};

/// Credential file name in the cache directory
pub const CREDENTIAL_FILE: &str = "session.enc";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub struct EncryptedFileStore {
    path: PathBuf,
    passphrase: String,
}

impl EncryptedFileStore {
    /// Store the credential at `dir/session.enc`.
    pub fn new(dir: impl AsRef<Path>, passphrase: impl Into<String>) -> Self {
        Self {
            path: dir.as_ref().join(CREDENTIAL_FILE),
            passphrase: passphrase.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], StorageError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StorageError::Backend(format!("key derivation failed: {}", e)))?;
        Ok(key)
    }

    fn seal(passphrase: &str, token: &str) -> Result<Vec<u8>, StorageError> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = Self::derive_key(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), token.as_bytes())
            .map_err(|_| StorageError::Backend("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(passphrase: &str, sealed: &[u8]) -> Result<String, StorageError> {
        if sealed.len() < SALT_LEN + NONCE_LEN {
            return Err(StorageError::Corrupt("credential file is truncated".to_string()));
        }
        let (salt, rest) = sealed.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = Self::derive_key(passphrase, salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StorageError::Corrupt("credential file failed to decrypt".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| StorageError::Corrupt("decrypted token is not valid UTF-8".to_string()))
    }

    /// Write through a uniquely named temp file and rename it into place, so a
    /// concurrent reader sees either the old record or the new one.
    fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::Io("credential path has no parent".to_string()))?;
        std::fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(
            "{}.{:016x}.tmp",
            CREDENTIAL_FILE,
            rand::thread_rng().next_u64()
        ));
        std::fs::write(&tmp, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for EncryptedFileStore {
    async fn save(&self, token: &str) -> Result<(), StorageError> {
        let (path, passphrase, token) = (self.path.clone(), self.passphrase.clone(), token.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let sealed = Self::seal(&passphrase, &token)?;
            Self::write_atomically(&path, &sealed)?;
            debug!(path = %path.display(), "Stored session token in encrypted file");
            Ok(())
        })
        .await?
    }

    async fn load(&self) -> Result<Option<String>, StorageError> {
        let (path, passphrase) = (self.path.clone(), self.passphrase.clone());
        tokio::task::spawn_blocking(move || -> Result<Option<String>, StorageError> {
            let sealed = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            Self::open(&passphrase, &sealed).map(Some)
        })
        .await?
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }
}
