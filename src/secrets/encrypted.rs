//! Credentials encrypted at rest in the key-value store.
//!
//! Payload layout before hex encoding: `MAGIC || nonce (24 bytes) || ciphertext`.
//! The cipher key is SHA-256 of the key material.

use std::env;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::keychain::{
    MASTER_KEY_ENTRY, safe_keyring_entry, safe_keyring_get_password, safe_keyring_store_verified,
};
use super::{SecretError, SecretStore, StoredCredentials};
use crate::storage::{KeyValueStore, keys};

/// Environment variable overriding the keychain-held master key.
pub const MASTER_KEY_ENV: &str = "ROUTER_SESSION_MASTER_KEY";

const MAGIC: &[u8; 4] = b"RSC1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Secret store that keeps an encrypted envelope under [`keys::CREDENTIALS`].
pub struct EncryptedSecretStore {
    kv: Arc<dyn KeyValueStore>,
    key_material: String,
}

impl fmt::Debug for EncryptedSecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecretStore")
            .field("key_material", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl EncryptedSecretStore {
    /// Resolves key material from [`MASTER_KEY_ENV`], else loads (or creates)
    /// the master key in the OS keychain.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::KeychainUnavailable`] when the env var is unset
    /// and the keychain cannot be used.
    pub fn from_environment(kv: Arc<dyn KeyValueStore>) -> Result<Self, SecretError> {
        if let Some(from_env) = env::var_os(MASTER_KEY_ENV) {
            let key = from_env.to_string_lossy().trim().to_string();
            if !key.is_empty() {
                return Ok(Self::with_key_material(kv, key));
            }
        }
        Self::from_keychain_entry(kv, MASTER_KEY_ENTRY)
    }

    /// Loads the master key held in keychain entry `entry_name`, creating it
    /// on first use. Every instance opened on the same entry shares the key.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::KeychainUnavailable`] when the keychain cannot
    /// be used or does not keep what is written to it.
    pub fn from_keychain_entry(
        kv: Arc<dyn KeyValueStore>,
        entry_name: &str,
    ) -> Result<Self, SecretError> {
        Ok(Self::with_key_material(kv, load_or_create_key(entry_name)?))
    }

    #[must_use]
    pub fn with_key_material(kv: Arc<dyn KeyValueStore>, key_material: impl Into<String>) -> Self {
        Self {
            kv,
            key_material: key_material.into(),
        }
    }
}

#[async_trait]
impl SecretStore for EncryptedSecretStore {
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    async fn store_credentials(&self, credentials: &StoredCredentials) -> Result<(), SecretError> {
        let plaintext = serde_json::to_vec(credentials)?;
        let envelope = encrypt_bytes(&plaintext, &self.key_material)?;
        self.kv
            .set(keys::CREDENTIALS, &hex_encode(&envelope))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_credentials(&self) -> Result<Option<StoredCredentials>, SecretError> {
        let Some(stored) = self.kv.get(keys::CREDENTIALS).await? else {
            debug!("no stored credentials");
            return Ok(None);
        };
        let envelope = hex_decode(&stored).ok_or(SecretError::InvalidPayload)?;
        let plaintext = decrypt_bytes(&envelope, &self.key_material)?;
        let credentials =
            serde_json::from_slice(&plaintext).map_err(|_| SecretError::InvalidPayload)?;
        Ok(Some(credentials))
    }

    #[instrument(skip(self))]
    async fn clear_credentials(&self) -> Result<(), SecretError> {
        self.kv.remove(keys::CREDENTIALS).await?;
        Ok(())
    }
}

fn load_or_create_key(entry_name: &str) -> Result<String, SecretError> {
    let entry = safe_keyring_entry(entry_name)?;
    match safe_keyring_get_password(&entry)? {
        Some(existing) if !existing.trim().is_empty() => Ok(existing),
        _ => {
            let generated = generate_key_material();
            safe_keyring_store_verified(entry_name, &generated)?;
            debug!("created credential master key");
            Ok(generated)
        }
    }
}

fn generate_key_material() -> String {
    let mut bytes = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn derive_key_bytes(key_material: &str) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(key_material.as_bytes());
    let mut key = [0_u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

fn encrypt_bytes(plaintext: &[u8], key_material: &str) -> Result<Vec<u8>, SecretError> {
    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));

    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| SecretError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(MAGIC);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt_bytes(payload: &[u8], key_material: &str) -> Result<Vec<u8>, SecretError> {
    let Some((magic, rest)) = payload.split_first_chunk::<4>() else {
        return Err(SecretError::InvalidPayload);
    };
    if magic != MAGIC || rest.len() < NONCE_LEN {
        return Err(SecretError::InvalidPayload);
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key_bytes = derive_key_bytes(key_material);
    XChaCha20Poly1305::new(Key::from_slice(&key_bytes))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecretError::DecryptionFailed)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let high = char::from(pair[0]).to_digit(16)?;
            let low = char::from(pair[1]).to_digit(16)?;
            u8::try_from(high * 16 + low).ok()
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::secrets::keychain::safe_keyring_delete_credential;
    use crate::storage::MemoryKeyValueStore;

    fn store_with_key(kv: &Arc<MemoryKeyValueStore>, key: &str) -> EncryptedSecretStore {
        EncryptedSecretStore::with_key_material(Arc::clone(kv) as Arc<dyn KeyValueStore>, key)
    }

    #[tokio::test]
    async fn test_store_and_load_round_trip() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = store_with_key(&kv, "test-key");

        store
            .store_credentials(&StoredCredentials::new("admin", "s3cret"))
            .await
            .unwrap();
        let loaded = store.load_credentials().await.unwrap().unwrap();
        assert_eq!(loaded.username, "admin");
        assert_eq!(loaded.password(), "s3cret");
    }

    #[tokio::test]
    async fn test_ciphertext_does_not_contain_plaintext() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = store_with_key(&kv, "test-key");
        store
            .store_credentials(&StoredCredentials::new("admin", "s3cret"))
            .await
            .unwrap();

        let raw = kv.get(keys::CREDENTIALS).await.unwrap().unwrap();
        assert!(!raw.contains("admin"));
        assert!(!raw.contains("s3cret"));
        assert!(raw.starts_with(&hex_encode(MAGIC)));
    }

    #[tokio::test]
    async fn test_load_with_wrong_key_fails() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        store_with_key(&kv, "key-a")
            .store_credentials(&StoredCredentials::new("admin", "pw"))
            .await
            .unwrap();

        let result = store_with_key(&kv, "key-b").load_credentials().await;
        assert!(matches!(result, Err(SecretError::DecryptionFailed)));
    }

    #[tokio::test]
    async fn test_invalid_payload_fails() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(keys::CREDENTIALS, "not-hex").await.unwrap();
        let result = store_with_key(&kv, "k").load_credentials().await;
        assert!(matches!(result, Err(SecretError::InvalidPayload)));

        kv.set(keys::CREDENTIALS, "00112233").await.unwrap();
        let result = store_with_key(&kv, "k").load_credentials().await;
        assert!(matches!(result, Err(SecretError::InvalidPayload)));
    }

    #[tokio::test]
    async fn test_clear_removes_entry() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = store_with_key(&kv, "k");
        store
            .store_credentials(&StoredCredentials::new("admin", "pw"))
            .await
            .unwrap();
        store.clear_credentials().await.unwrap();
        assert!(store.load_credentials().await.unwrap().is_none());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_keychain_key_shared_between_instances() {
        let entry_name = format!("router-master-key-test-{}", uuid::Uuid::new_v4());
        let kv = Arc::new(MemoryKeyValueStore::new());
        let shared = Arc::clone(&kv) as Arc<dyn KeyValueStore>;

        let opened = EncryptedSecretStore::from_keychain_entry(Arc::clone(&shared), &entry_name);
        let writer = match opened {
            Ok(store) => store,
            Err(SecretError::KeychainUnavailable) => {
                eprintln!("[keychain-test] no persistent keychain available; skipping");
                return;
            }
            Err(other) => panic!("unexpected keychain error: {other}"),
        };
        writer
            .store_credentials(&StoredCredentials::new("admin", "pw"))
            .await
            .unwrap();

        let reader = EncryptedSecretStore::from_keychain_entry(shared, &entry_name).unwrap();
        let loaded = reader.load_credentials().await.unwrap().unwrap();
        assert_eq!(loaded.password(), "pw");

        let entry = safe_keyring_entry(&entry_name).unwrap();
        safe_keyring_delete_credential(&entry).unwrap();
    }

    #[test]
    fn test_hex_decode_inverts_encode() {
        let bytes = [0_u8, 1, 127, 128, 255];
        assert_eq!(hex_decode(&hex_encode(&bytes)).unwrap(), bytes);
        assert!(hex_decode("abc").is_none());
        assert!(hex_decode("zz").is_none());
    }
}
