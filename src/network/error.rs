//! Error types for the network layer.

use std::error::Error as _;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed call. Drives the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// The call timed out before a response arrived.
    Timeout,
    /// Host name resolution failed.
    Dns,
    /// The router refused the TCP connection.
    ConnectionRefused,
    /// A cross-origin policy blocked the call.
    Cors,
    /// Any other transport-level failure (reset, unreachable, broken body).
    Network,
    /// HTTP 5xx.
    Server,
    /// HTTP 4xx, including 401/403 session rejections.
    Client,
    /// Nothing recognisable.
    Unknown,
}

impl NetworkErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::ConnectionRefused => "connection_refused",
            Self::Cors => "cors",
            Self::Network => "network",
            Self::Server => "server",
            Self::Client => "client",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a later attempt could plausibly succeed.
    ///
    /// 4xx and CORS rejections are final: repeating them would only hide the
    /// rejection behind a slower failure.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Dns | Self::ConnectionRefused | Self::Network | Self::Server
        )
    }

    /// Whether the router could not be reached at all.
    #[must_use]
    pub fn is_unreachable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Dns | Self::ConnectionRefused | Self::Network
        )
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure reported by a [`Transport`](super::Transport) before classification.
///
/// Carries just enough of the underlying error to classify it without
/// depending on the concrete HTTP client.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Full error chain, joined with `": "`.
    pub message: String,
    /// The client reported a timeout.
    pub timed_out: bool,
    /// The failure happened in the transport (connect, send, body read).
    pub transport_level: bool,
    /// First `io::Error` kind found in the source chain.
    pub io_kind: Option<io::ErrorKind>,
}

impl TransportError {
    /// A failure with only a message to go on.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
            transport_level: false,
            io_kind: None,
        }
    }

    /// A timeout before any response byte arrived.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
            transport_level: true,
            io_kind: Some(io::ErrorKind::TimedOut),
        }
    }

    /// A transport failure with a known `io::ErrorKind`.
    #[must_use]
    pub fn io(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: kind == io::ErrorKind::TimedOut,
            transport_level: true,
            io_kind: Some(kind),
        }
    }

    /// Captures a reqwest error, walking its source chain for an `io::Error`.
    #[must_use]
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let mut message = error.to_string();
        let mut io_kind = None;
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            if io_kind.is_none()
                && let Some(io_error) = cause.downcast_ref::<io::Error>()
            {
                io_kind = Some(io_error.kind());
            }
            source = cause.source();
        }

        Self {
            message,
            timed_out: error.is_timeout(),
            transport_level: error.is_connect()
                || error.is_request()
                || error.is_body()
                || error.is_timeout(),
            io_kind,
        }
    }
}

/// Final, classified failure of one logical call after retries are exhausted.
#[derive(Debug, Clone, Error)]
#[error("{kind} error on {method} {url} after {attempts} attempt(s): {message}")]
pub struct NetworkError {
    /// Classification.
    pub kind: NetworkErrorKind,
    /// Human-readable cause.
    pub message: String,
    /// HTTP status for `client` / `server` failures.
    pub status: Option<u16>,
    /// Request id shared by every attempt of the call.
    pub request_id: String,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// HTTP method.
    pub method: String,
    /// Target URL.
    pub url: String,
}

impl NetworkError {
    /// Whether this is a 401/403 rejection of the current session.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status, Some(401 | 403))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_is_snake_case() {
        assert_eq!(NetworkErrorKind::ConnectionRefused.to_string(), "connection_refused");
        assert_eq!(
            serde_json::to_string(&NetworkErrorKind::ConnectionRefused).unwrap(),
            "\"connection_refused\""
        );
    }

    #[test]
    fn test_retryable_kinds() {
        let retryable: Vec<_> = [
            NetworkErrorKind::Timeout,
            NetworkErrorKind::Dns,
            NetworkErrorKind::ConnectionRefused,
            NetworkErrorKind::Cors,
            NetworkErrorKind::Network,
            NetworkErrorKind::Server,
            NetworkErrorKind::Client,
            NetworkErrorKind::Unknown,
        ]
        .into_iter()
        .filter(|kind| kind.is_retryable())
        .collect();

        assert_eq!(
            retryable,
            vec![
                NetworkErrorKind::Timeout,
                NetworkErrorKind::Dns,
                NetworkErrorKind::ConnectionRefused,
                NetworkErrorKind::Network,
                NetworkErrorKind::Server,
            ]
        );
    }

    #[test]
    fn test_network_error_display() {
        let error = NetworkError {
            kind: NetworkErrorKind::Client,
            message: "HTTP 403".to_string(),
            status: Some(403),
            request_id: "req-1".to_string(),
            attempts: 1,
            method: "GET".to_string(),
            url: "http://192.168.1.1/".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.starts_with("client error on GET http://192.168.1.1/"), "{msg}");
        assert!(error.is_auth_rejection());
    }

    #[test]
    fn test_transport_error_io_timeout_sets_flag() {
        let error = TransportError::io(io::ErrorKind::TimedOut, "read timed out");
        assert!(error.timed_out);
        assert!(error.transport_level);
    }
}
