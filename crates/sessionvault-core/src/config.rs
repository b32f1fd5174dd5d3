//! Application configuration management.
//!
//! This module handles loading and saving the configuration: API base URL,
//! timeouts, token refresh timing, and which secure store backend to use.
//!
//! Configuration is stored at `~/.config/sessionvault/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::transport::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::api::HttpTransport;
use crate::auth::RefreshPolicy;
use crate::store::keychain::DEFAULT_SERVICE_NAME;
use crate::store::{EncryptedFileStore, KeyringStore, MemoryStore, SecureStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionvault";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Encrypted session file name in the data directory
const SESSION_FILE: &str = "session.bin";

/// Environment variable overriding `base_url`
pub const BASE_URL_ENV: &str = "SESSIONVAULT_BASE_URL";

/// Environment variable holding the passphrase for the file store
pub const STORE_PASSPHRASE_ENV: &str = "SESSIONVAULT_STORE_PASSPHRASE";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted file
    File,
    /// Nothing persisted; the session dies with the process. For throwaway
    /// runs and tests, every CLI invocation starts logged out.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// 0 disables proactive refresh
    pub access_token_lifetime_minutes: i64,
    pub refresh_buffer_minutes: i64,
    pub store: StoreBackend,
    pub keyring_service: String,
}

impl Default for Config {
    fn default() -> Self {
        let policy = RefreshPolicy::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            access_token_lifetime_minutes: policy
                .access_token_lifetime
                .map(|d| d.num_minutes())
                .unwrap_or(0),
            refresh_buffer_minutes: policy.refresh_buffer.num_minutes(),
            store: StoreBackend::default(),
            keyring_service: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn session_file_path() -> Result<PathBuf> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(SESSION_FILE))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Token refresh timing. A lifetime of 0 turns proactive refresh off;
    /// otherwise the buffer must be shorter than the lifetime.
    pub fn refresh_policy(&self) -> Result<RefreshPolicy> {
        let refresh_buffer = minutes("refresh_buffer_minutes", self.refresh_buffer_minutes.max(0))?;

        let access_token_lifetime = if self.access_token_lifetime_minutes > 0 {
            let lifetime = minutes("access_token_lifetime_minutes", self.access_token_lifetime_minutes)?;
            if refresh_buffer >= lifetime {
                anyhow::bail!(
                    "refresh_buffer_minutes ({}) must be less than access_token_lifetime_minutes ({})",
                    self.refresh_buffer_minutes,
                    self.access_token_lifetime_minutes
                );
            }
            Some(lifetime)
        } else {
            None
        };

        Ok(RefreshPolicy {
            access_token_lifetime,
            refresh_buffer,
        })
    }

    pub fn transport(&self) -> Result<HttpTransport> {
        HttpTransport::new(self.base_url.clone(), self.request_timeout())
            .context("Failed to build HTTP client")
    }

    /// Open the configured secure store. The file backend needs a passphrase.
    pub fn open_store(&self, passphrase: Option<String>) -> Result<Arc<dyn SecureStore>> {
        let store: Arc<dyn SecureStore> = match self.store {
            StoreBackend::Keyring => Arc::new(KeyringStore::new(self.keyring_service.clone())),
            StoreBackend::File => {
                let passphrase = passphrase.filter(|p| !p.is_empty()).ok_or_else(|| {
                    anyhow::anyhow!("File store requires a passphrase (set {})", STORE_PASSPHRASE_ENV)
                })?;
                Arc::new(EncryptedFileStore::new(Self::session_file_path()?, passphrase))
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store; the session will not outlive this process");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(store)
    }
}

fn minutes(field: &str, value: i64) -> Result<chrono::Duration> {
    chrono::Duration::try_minutes(value)
        .ok_or_else(|| anyhow::anyhow!("{} is out of range: {}", field, value))
}
