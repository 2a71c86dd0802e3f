//! Durable key-value state.
//!
//! Everything the service persists (session descriptor, audit buffer,
//! encrypted credentials, the biometric flag) goes through [`KeyValueStore`]
//! under the constant keys in [`keys`].

mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;

/// Keys used in the key-value store.
pub mod keys {
    /// Serialized session descriptor.
    pub const SESSION: &str = "router_session.session";
    /// Encrypted router credentials.
    pub const CREDENTIALS: &str = "router_session.credentials";
    /// Serialized audit log buffer.
    pub const AUDIT_LOG: &str = "router_session.audit_log";
    /// Whether the UI should gate access behind biometrics.
    pub const BIOMETRIC_ENABLED: &str = "router_session.biometric_enabled";
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database query or connection failure.
    #[error("state database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure.
    #[error("failed to run state migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be (de)serialized.
    #[error("stored value for '{key}' is invalid: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Backend refused the operation.
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn invalid_value(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidValue {
            key: key.into(),
            source,
        }
    }
}

/// Async string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored value, or `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Inserts or replaces a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes a key. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
