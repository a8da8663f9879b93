//! Application configuration management.
//!
//! Holds the API base URL, which credential store backend to use, the
//! request timeout and the last identifier used to sign in.
//!
//! Configuration is stored at `~/.config/cafedash/config.json`. Environment
//! variables override the file:
//! - `CAFEDASH_API_URL`
//! - `CAFEDASH_STORE` (`keyring`, `file` or `memory`)
//! - `CAFEDASH_STORE_PASSPHRASE` (passphrase for the encrypted file; required
//!   by the `file` store)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::auth::{CredentialStore, EncryptedFileStore, FallbackStore, KeyringStore, MemoryStore};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "cafedash";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

const ENV_API_URL: &str = "CAFEDASH_API_URL";
const ENV_STORE: &str = "CAFEDASH_STORE";
const ENV_STORE_PASSPHRASE: &str = "CAFEDASH_STORE_PASSPHRASE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown credential store '{0}' (expected keyring, file or memory)")]
    UnknownStore(String),

    #[error("The file credential store needs CAFEDASH_STORE_PASSPHRASE")]
    MissingPassphrase,
}

/// Where the session token is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keyring" | "keychain" => Ok(StoreBackend::Keyring),
            "file" => Ok(StoreBackend::File),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::UnknownStore(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub store: StoreBackend,
    pub request_timeout_secs: u64,
    pub last_identifier: Option<String>,

    /// Only ever taken from the environment
    #[serde(skip)]
    pub store_passphrase: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            store: StoreBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            last_identifier: None,
            store_passphrase: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(store) = lookup(ENV_STORE).filter(|v| !v.trim().is_empty()) {
            self.store = store.parse()?;
        }
        if let Some(passphrase) = lookup(ENV_STORE_PASSPHRASE).filter(|v| !v.is_empty()) {
            self.store_passphrase = Some(passphrase);
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoDirectory("cache"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Passphrase protecting the keychain's file fallback.
    ///
    /// Without `CAFEDASH_STORE_PASSPHRASE` this is derived from the machine id
    /// and home directory. Anyone who can read those can rebuild it, so the
    /// fallback file is then only obscured, not protected.
    fn fallback_passphrase(&self) -> String {
        if let Some(passphrase) = &self.store_passphrase {
            return passphrase.clone();
        }
        let machine_id = ["/etc/machine-id", "/var/lib/dbus/machine-id"]
            .iter()
            .find_map(|path| std::fs::read_to_string(path).ok())
            .map(|id| id.trim().to_string())
            .unwrap_or_default();
        let home = dirs::home_dir()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}:{}:{}", APP_NAME, machine_id, home)
    }

    /// Build the configured credential store.
    ///
    /// The `file` backend requires an explicit passphrase.
    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>, ConfigError> {
        let store: Arc<dyn CredentialStore> = match self.store {
            StoreBackend::Keyring => Arc::new(FallbackStore::new(
                Arc::new(KeyringStore::new()),
                Arc::new(EncryptedFileStore::new(
                    self.cache_dir()?,
                    self.fallback_passphrase(),
                )),
            )),
            StoreBackend::File => {
                let passphrase = self
                    .store_passphrase
                    .clone()
                    .ok_or(ConfigError::MissingPassphrase)?;
                Arc::new(EncryptedFileStore::new(self.cache_dir()?, passphrase))
            }
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
