//! Network resilience layer.
//!
//! [`Transport`] is the raw HTTP seam; [`ResilientClient`] adds request ids,
//! retry with backoff, failure classification, cookie handling and auditing.

mod client;
mod error;
mod retry;
mod transport;

pub use client::{CookieObserver, DEFAULT_REQUEST_TIMEOUT, ResilientClient};
pub use error::{NetworkError, NetworkErrorKind, TransportError};
pub use retry::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy, classify_status,
    classify_transport_error,
};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
