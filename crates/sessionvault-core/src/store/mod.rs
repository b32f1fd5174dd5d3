//! Secure key-value storage for session credentials.
//!
//! This module provides:
//! - `SecureStore`: the get/set/delete capability the credential store persists through
//! - `KeyringStore`: OS keychain storage via keyring
//! - `EncryptedFileStore`: passphrase-encrypted file for hosts without a keychain
//! - `MemoryStore`: in-process storage for tests and throwaway sessions
//!
//! Confidentiality at rest is the backend's job; callers treat values as opaque strings.

pub mod file;
pub mod keychain;
pub mod memory;

use thiserror::Error;

pub use file::EncryptedFileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// Key holding the current access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Key holding the serialized user identity record
pub const USER_KEY: &str = "user";

/// Every key a session occupies. Absence of any of them means "logged out".
pub const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] ::keyring::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

/// Opaque persistence capability. Implementations are synchronous and may be slow.
pub trait SecureStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a value. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
