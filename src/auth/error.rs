use thiserror::Error;

use super::FailureCategory;
use crate::config::ConfigError;
use crate::network::NetworkError;
use crate::secrets::SecretError;
use crate::storage::StorageError;

/// Errors surfaced by [`super::AuthService`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// Final classified failure of a router call, after retries.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Credentials rejected, or no session id could be extracted.
    #[error("authentication failed ({category}): {message}")]
    Authentication {
        category: FailureCategory,
        message: String,
    },

    #[error("no active session")]
    SessionExpired,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
