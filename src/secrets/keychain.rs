//! OS keychain access.
//!
//! Every `keyring` call is wrapped in `catch_unwind`: some platform backends
//! panic instead of erroring when no keychain service is running.

use std::panic::{AssertUnwindSafe, catch_unwind};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{SecretError, SecretStore, StoredCredentials};

const KEYRING_SERVICE: &str = "router-session";
const CREDENTIALS_ENTRY: &str = "router-credentials-v1";
pub(super) const MASTER_KEY_ENTRY: &str = "credential-master-key-v1";

/// Stores credentials directly in the OS keychain as JSON.
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    entry_name: String,
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self {
            entry_name: CREDENTIALS_ENTRY.to_string(),
        }
    }
}

impl KeyringSecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom keychain entry name, e.g. one per router profile.
    #[must_use]
    pub fn with_entry_name(entry_name: impl Into<String>) -> Self {
        Self {
            entry_name: entry_name.into(),
        }
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    async fn store_credentials(&self, credentials: &StoredCredentials) -> Result<(), SecretError> {
        let payload = serde_json::to_string(credentials)?;
        safe_keyring_store_verified(&self.entry_name, &payload)
    }

    #[instrument(skip(self))]
    async fn load_credentials(&self) -> Result<Option<StoredCredentials>, SecretError> {
        let entry = safe_keyring_entry(&self.entry_name)?;
        let Some(payload) = safe_keyring_get_password(&entry)? else {
            debug!("no credentials in keychain");
            return Ok(None);
        };
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|_| SecretError::InvalidPayload)
    }

    #[instrument(skip(self))]
    async fn clear_credentials(&self) -> Result<(), SecretError> {
        let entry = safe_keyring_entry(&self.entry_name)?;
        safe_keyring_delete_credential(&entry)
    }
}

pub(super) fn safe_keyring_entry(name: &str) -> Result<keyring::Entry, SecretError> {
    catch_unwind(|| keyring::Entry::new(KEYRING_SERVICE, name))
        .map_err(|_| SecretError::KeychainUnavailable)?
        .map_err(|_| SecretError::KeychainUnavailable)
}

/// `Ok(None)` when the entry does not exist.
pub(super) fn safe_keyring_get_password(
    entry: &keyring::Entry,
) -> Result<Option<String>, SecretError> {
    match catch_unwind(AssertUnwindSafe(|| entry.get_password()))
        .map_err(|_| SecretError::KeychainUnavailable)?
    {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(_) => Err(SecretError::KeychainUnavailable),
    }
}

fn safe_keyring_set_password(
    entry: &keyring::Entry,
    password: &str,
) -> Result<(), SecretError> {
    catch_unwind(AssertUnwindSafe(|| entry.set_password(password)))
        .map_err(|_| SecretError::KeychainUnavailable)?
        .map_err(|_| SecretError::KeychainUnavailable)
}

/// Writes `value` and reads it back through a fresh entry.
///
/// A backend that accepts writes but keeps nothing across entries (keyring's
/// mock store) is reported as [`SecretError::KeychainUnavailable`].
pub(super) fn safe_keyring_store_verified(name: &str, value: &str) -> Result<(), SecretError> {
    safe_keyring_set_password(&safe_keyring_entry(name)?, value)?;
    let read_back = safe_keyring_get_password(&safe_keyring_entry(name)?)?;
    if read_back.as_deref() == Some(value) {
        Ok(())
    } else {
        warn!(entry = name, "keychain accepted a write but did not keep it");
        Err(SecretError::KeychainUnavailable)
    }
}

pub(super) fn safe_keyring_delete_credential(entry: &keyring::Entry) -> Result<(), SecretError> {
    match catch_unwind(AssertUnwindSafe(|| entry.delete_credential()))
        .map_err(|_| SecretError::KeychainUnavailable)?
    {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(_) => Err(SecretError::KeychainUnavailable),
    }
}
