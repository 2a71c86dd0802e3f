//! Audit log entry types.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::network::NetworkErrorKind;

/// Authentication step recorded in an `auth` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthAction {
    LoginAttempt,
    LoginSuccess,
    LoginFailed,
    LoginError,
    Logout,
    VerifySuccess,
    VerifyFailed,
    RefreshSuccess,
    RefreshFailed,
    AutoLoginAttempt,
    AutoLoginSkipped,
    SessionRestored,
    SessionExpired,
    SessionCleared,
    CredentialsStored,
    CredentialsCleared,
}

impl AuthAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginAttempt => "login_attempt",
            Self::LoginSuccess => "login_success",
            Self::LoginFailed => "login_failed",
            Self::LoginError => "login_error",
            Self::Logout => "logout",
            Self::VerifySuccess => "verify_success",
            Self::VerifyFailed => "verify_failed",
            Self::RefreshSuccess => "refresh_success",
            Self::RefreshFailed => "refresh_failed",
            Self::AutoLoginAttempt => "auto_login_attempt",
            Self::AutoLoginSkipped => "auto_login_skipped",
            Self::SessionRestored => "session_restored",
            Self::SessionExpired => "session_expired",
            Self::SessionCleared => "session_cleared",
            Self::CredentialsStored => "credentials_stored",
            Self::CredentialsCleared => "credentials_cleared",
        }
    }
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry kind, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Request,
    Response,
    Retry,
    Error,
    Auth,
}

/// What happened.
///
/// Network kinds carry the request id shared by every attempt of one logical
/// call; `auth` entries describe orchestration steps and carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// An attempt is about to be sent.
    Request {
        request_id: String,
        method: String,
        url: String,
        attempt: u32,
    },
    /// An attempt completed with a non-error status.
    Response {
        request_id: String,
        method: String,
        url: String,
        status: u16,
        duration_ms: u64,
        attempt: u32,
    },
    /// A further attempt will be made after `delay_ms`.
    Retry {
        request_id: String,
        attempt: u32,
        delay_ms: u64,
        kind: NetworkErrorKind,
    },
    /// An attempt failed.
    Error {
        request_id: String,
        method: String,
        url: String,
        kind: NetworkErrorKind,
        message: String,
        status: Option<u16>,
        duration_ms: u64,
        attempt: u32,
    },
    /// An authentication step.
    Auth {
        action: AuthAction,
        success: bool,
        detail: String,
        session_id: Option<String>,
        username: Option<String>,
    },
}

impl AuditEvent {
    /// Builds an `auth` event.
    #[must_use]
    pub fn auth(
        action: AuthAction,
        success: bool,
        detail: impl Into<String>,
        session_id: Option<&str>,
        username: Option<&str>,
    ) -> Self {
        Self::Auth {
            action,
            success,
            detail: detail.into(),
            session_id: session_id.map(str::to_string),
            username: username.map(str::to_string),
        }
    }

    #[must_use]
    pub fn kind(&self) -> AuditKind {
        match self {
            Self::Request { .. } => AuditKind::Request,
            Self::Response { .. } => AuditKind::Response,
            Self::Retry { .. } => AuditKind::Retry,
            Self::Error { .. } => AuditKind::Error,
            Self::Auth { .. } => AuditKind::Auth,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Request { request_id, .. }
            | Self::Response { request_id, .. }
            | Self::Retry { request_id, .. }
            | Self::Error { request_id, .. } => Some(request_id),
            Self::Auth { .. } => None,
        }
    }

    /// Classification for `error` entries.
    #[must_use]
    pub fn error_kind(&self) -> Option<NetworkErrorKind> {
        match self {
            Self::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Measured latency, for entries that completed a round trip.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Response { duration_ms, .. } | Self::Error { duration_ms, .. } => {
                Some(*duration_ms)
            }
            _ => None,
        }
    }

    /// The `auth` action, if this is an auth entry.
    #[must_use]
    pub fn auth_action(&self) -> Option<AuthAction> {
        match self {
            Self::Auth { action, .. } => Some(*action),
            _ => None,
        }
    }
}

/// A stored audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Monotonic id assigned by the store.
    pub id: u64,
    /// Unix milliseconds at insertion.
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Current wall clock as unix milliseconds.
#[must_use]
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
