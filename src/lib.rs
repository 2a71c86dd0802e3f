//! Router Session Core Library
//!
//! Establishes, persists, verifies, refreshes and recovers an authenticated
//! session against a router's web administration interface.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`cookies`] - `Set-Cookie` decoding, `Cookie` header encoding, outbound cookie stores
//! - [`network`] - Resilient HTTP client: classification, retry with backoff, auditing
//! - [`audit`] - Bounded, persisted log of network and authentication events
//! - [`storage`] - Durable key-value state (SQLite or in-memory)
//! - [`secrets`] - Credential storage (OS keychain or encrypted key-value entry)
//! - [`session`] - Session state machine with scheduled refresh
//! - [`auth`] - Login, logout, verification and auto-login orchestration
//! - [`config`] - Router configuration and validation

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod auth;
pub mod config;
pub mod cookies;
pub mod network;
pub mod secrets;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use audit::{AuditEvent, AuditKind, AuditLogEntry, AuditLogStore, AuditStats, AuthAction};
pub use auth::{AuthError, AuthResult, AuthService, AuthServiceBuilder, FailureCategory};
pub use config::{ConfigError, RouterConfig};
pub use cookies::{Cookie, CookieStore, CookieStrategy};
pub use network::{
    HttpRequest, HttpResponse, NetworkError, NetworkErrorKind, ReqwestTransport, ResilientClient,
    RetryPolicy, Transport, TransportError,
};
pub use secrets::{
    EncryptedSecretStore, KeyringSecretStore, MemorySecretStore, SecretError, SecretStore,
    StoredCredentials,
};
pub use session::{SessionInfo, SessionManager, SessionState};
pub use storage::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore, StorageError};
