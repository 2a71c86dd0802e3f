//! Failure classification and retry policy with exponential backoff.
//!
//! Every failed attempt is classified into a [`NetworkErrorKind`]; the
//! [`RetryPolicy`] then decides whether another attempt is worth making.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use router_session_core::network::{NetworkErrorKind, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(500));
//!
//! match policy.should_retry(NetworkErrorKind::ConnectionRefused, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(attempt, 2);
//!         assert_eq!(delay, Duration::from_millis(500));
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::io;
use std::time::Duration;

use tracing::{debug, instrument};

use super::error::{NetworkErrorKind, TransportError};

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay before the second attempt.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Exponent cap; keeps `2^n` inside `u32`.
const MAX_BACKOFF_EXPONENT: u32 = 31;

/// Decision on whether to make another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// Which attempt this will be (1-indexed, so the first retry is attempt 2).
        attempt: u32,
    },

    /// Stop and surface the error.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry configuration, read-only after construction.
///
/// Delay before attempt `n` (n >= 2) is `base_delay * 2^(n-2)`: with a one
/// second base, attempts 2, 3, 4 wait 1s, 2s, 4s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay before the first retry.
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed with `kind`.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, kind: NetworkErrorKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: format!("{kind} failure - retry would not help"),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let next_attempt = attempt + 1;
        let delay = self.delay_before(next_attempt);

        debug!(
            attempt,
            next_attempt,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: next_attempt,
        }
    }

    /// Delay before `attempt` (1-indexed). The first attempt never waits.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }
}

/// Classifies a transport failure (no HTTP response was received).
///
/// | Condition | Kind |
/// |-----------|------|
/// | timeout flag or `TimedOut` io kind | `timeout` |
/// | resolver message | `dns` |
/// | `ConnectionRefused` io kind or message | `connection_refused` |
/// | cross-origin message | `cors` |
/// | any other transport-level failure | `network` |
/// | anything else | `unknown` |
#[must_use]
pub fn classify_transport_error(error: &TransportError) -> NetworkErrorKind {
    let message = error.message.to_ascii_lowercase();

    if error.timed_out || error.io_kind == Some(io::ErrorKind::TimedOut) {
        return NetworkErrorKind::Timeout;
    }

    if is_dns_message(&message) {
        return NetworkErrorKind::Dns;
    }

    if error.io_kind == Some(io::ErrorKind::ConnectionRefused)
        || message.contains("connection refused")
        || message.contains("econnrefused")
    {
        return NetworkErrorKind::ConnectionRefused;
    }

    if message.contains("cors") || message.contains("cross-origin") {
        return NetworkErrorKind::Cors;
    }

    if error.transport_level || error.io_kind.is_some() || message.contains("network") {
        return NetworkErrorKind::Network;
    }

    NetworkErrorKind::Unknown
}

/// Classifies an HTTP status. Returns `None` for statuses that are not failures.
#[must_use]
pub fn classify_status(status: u16) -> Option<NetworkErrorKind> {
    match status {
        500..=599 => Some(NetworkErrorKind::Server),
        400..=499 => Some(NetworkErrorKind::Client),
        _ => None,
    }
}

fn is_dns_message(message: &str) -> bool {
    message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("nodename nor servname")
        || message.contains("no such host")
        || message.contains("enotfound")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_delay_doubles_from_base() {
        let policy = RetryPolicy::new(6, Duration::from_millis(250));
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(250));
        assert_eq!(policy.delay_before(3), Duration::from_millis(500));
        assert_eq!(policy.delay_before(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(5), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_before(200), Duration::MAX);
    }

    #[test]
    fn test_should_retry_client_does_not_retry() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(NetworkErrorKind::Client, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_should_retry_cors_does_not_retry() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(NetworkErrorKind::Cors, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_should_retry_server_retries() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(NetworkErrorKind::Server, 1);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        assert!(matches!(
            policy.should_retry(NetworkErrorKind::Timeout, 1),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(NetworkErrorKind::Timeout, 2),
            RetryDecision::Retry { .. }
        ));

        let decision = policy.should_retry(NetworkErrorKind::Timeout, 3);
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("exhausted"));
        } else {
            panic!("expected DoNotRetry at max attempts");
        }
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify_timeout() {
        let error = TransportError::timeout("operation timed out");
        assert_eq!(classify_transport_error(&error), NetworkErrorKind::Timeout);
    }

    #[test]
    fn test_classify_dns() {
        let mut error = TransportError::other(
            "error sending request: client error (Connect): \
             dns error: failed to lookup address information",
        );
        error.transport_level = true;
        assert_eq!(classify_transport_error(&error), NetworkErrorKind::Dns);
    }

    #[test]
    fn test_classify_connection_refused_by_io_kind() {
        let error = TransportError::io(io::ErrorKind::ConnectionRefused, "tcp connect error");
        assert_eq!(
            classify_transport_error(&error),
            NetworkErrorKind::ConnectionRefused
        );
    }

    #[test]
    fn test_classify_connection_refused_by_message() {
        let error = TransportError::other("connect ECONNREFUSED 192.168.1.1:80");
        assert_eq!(
            classify_transport_error(&error),
            NetworkErrorKind::ConnectionRefused
        );
    }

    #[test]
    fn test_classify_cors() {
        let error = TransportError::other("blocked by CORS policy");
        assert_eq!(classify_transport_error(&error), NetworkErrorKind::Cors);
    }

    #[test]
    fn test_classify_other_transport_failure_is_network() {
        let error = TransportError::io(io::ErrorKind::ConnectionReset, "connection reset by peer");
        assert_eq!(classify_transport_error(&error), NetworkErrorKind::Network);
    }

    #[test]
    fn test_classify_unrecognised_is_unknown() {
        let error = TransportError::other("something odd happened");
        assert_eq!(classify_transport_error(&error), NetworkErrorKind::Unknown);
    }

    #[test]
    fn test_classify_status_ranges() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(302), None);
        assert_eq!(classify_status(401), Some(NetworkErrorKind::Client));
        assert_eq!(classify_status(403), Some(NetworkErrorKind::Client));
        assert_eq!(classify_status(499), Some(NetworkErrorKind::Client));
        assert_eq!(classify_status(500), Some(NetworkErrorKind::Server));
        assert_eq!(classify_status(599), Some(NetworkErrorKind::Server));
        assert_eq!(classify_status(600), None);
    }
}
