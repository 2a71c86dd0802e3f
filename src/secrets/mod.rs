//! Credential storage behind a swappable [`SecretStore`].
//!
//! Credentials are only written when the user opted into persistence.
//! Two durable backends exist: the OS keychain, and an XChaCha20-Poly1305
//! envelope stored in the key-value store whose key lives in the keychain
//! (or `ROUTER_SESSION_MASTER_KEY`). [`MemorySecretStore`] backs tests and
//! sessions that never persist.

mod encrypted;
mod keychain;

use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

pub use encrypted::{EncryptedSecretStore, MASTER_KEY_ENV};
pub use keychain::KeyringSecretStore;

/// Errors raised by secret stores.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The OS keychain could not be reached and no env key was provided.
    #[error(
        "unable to access system keychain; \
         set ROUTER_SESSION_MASTER_KEY or configure keychain access"
    )]
    KeychainUnavailable,

    /// Stored payload is malformed.
    #[error("stored credential payload is invalid")]
    InvalidPayload,

    #[error("failed to encrypt credentials")]
    EncryptionFailed,

    /// Wrong key or tampered ciphertext.
    #[error("failed to decrypt credentials")]
    DecryptionFailed,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Router login credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub username: String,
    password: String,
}

impl StoredCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Durable home for router credentials.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Replaces any stored credentials.
    async fn store_credentials(&self, credentials: &StoredCredentials) -> Result<(), SecretError>;

    /// Returns `Ok(None)` when nothing is stored.
    async fn load_credentials(&self) -> Result<Option<StoredCredentials>, SecretError>;

    /// Removing absent credentials is not an error.
    async fn clear_credentials(&self) -> Result<(), SecretError>;
}

/// Process-local secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    credentials: Mutex<Option<StoredCredentials>>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn store_credentials(&self, credentials: &StoredCredentials) -> Result<(), SecretError> {
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    async fn load_credentials(&self) -> Result<Option<StoredCredentials>, SecretError> {
        Ok(self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn clear_credentials(&self) -> Result<(), SecretError> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let credentials = StoredCredentials::new("admin", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemorySecretStore::new();
        assert!(store.load_credentials().await.unwrap().is_none());

        store
            .store_credentials(&StoredCredentials::new("admin", "pw"))
            .await
            .unwrap();
        let loaded = store.load_credentials().await.unwrap().unwrap();
        assert_eq!(loaded.username, "admin");
        assert_eq!(loaded.password(), "pw");

        store.clear_credentials().await.unwrap();
        store.clear_credentials().await.unwrap();
        assert!(store.load_credentials().await.unwrap().is_none());
    }
}
