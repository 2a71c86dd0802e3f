//! The resilient client every router call goes through.
//!
//! For one logical call it:
//! 1. assigns a request id reused by every attempt
//! 2. attaches the default outbound cookie header and diagnostic headers
//! 3. sends, measures latency, classifies failures
//! 4. retries retryable classes with exponential backoff, strictly in sequence
//! 5. decodes `Set-Cookie` headers and hands them to the cookie observer
//!
//! and records `request` / `response` / `error` / `retry` audit entries as it goes.

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::error::{NetworkError, NetworkErrorKind, TransportError};
use super::retry::{RetryDecision, RetryPolicy, classify_status, classify_transport_error};
use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::audit::{AuditEvent, AuditLogStore};
use crate::cookies::{Cookie, CookieStore, parse_set_cookie_headers};

/// Default per-call timeout when the request sets none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the request id to the router (useful in proxy logs).
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Receives cookies decoded from responses.
///
/// The session manager registers itself here so the default outbound cookie
/// set tracks whatever the router sends.
pub trait CookieObserver: Send + Sync {
    fn on_cookies(&self, origin: &Url, cookies: &[Cookie]);
}

enum AttemptOutcome {
    Success(HttpResponse),
    Failure(NetworkError),
}

/// Observable, retrying wrapper around a [`Transport`].
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    cookies: Arc<dyn CookieStore>,
    audit: Arc<AuditLogStore>,
    default_timeout: Duration,
    observer: RwLock<Option<Weak<dyn CookieObserver>>>,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("policy", &self.policy)
            .field("cookies", &self.cookies)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        cookies: Arc<dyn CookieStore>,
        audit: Arc<AuditLogStore>,
    ) -> Self {
        Self {
            transport,
            policy,
            cookies,
            audit,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            observer: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Shared outbound cookie set.
    #[must_use]
    pub fn cookie_store(&self) -> &Arc<dyn CookieStore> {
        &self.cookies
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLogStore> {
        &self.audit
    }

    /// Registers the observer notified of decoded response cookies.
    ///
    /// Held weakly: the observer owns this client, not the other way round.
    pub fn set_cookie_observer(&self, observer: Weak<dyn CookieObserver>) {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    /// Executes one logical call with retries.
    ///
    /// # Errors
    ///
    /// Returns the classified [`NetworkError`] of the last attempt once the
    /// failure is not retryable or attempts are exhausted. 4xx and 5xx
    /// responses are errors; 1xx-3xx are successes.
    #[instrument(
        skip(self, request),
        fields(method = %request.method, url = %request.url, request_id)
    )]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let mut attempt = 1;
        loop {
            let error = match self.attempt(&request, &request_id, attempt).await {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Failure(error) => error,
            };

            match self.policy.should_retry(error.kind, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    warn!(
                        attempt = next,
                        delay_ms,
                        kind = %error.kind,
                        "retrying router call"
                    );
                    self.audit
                        .add_log(AuditEvent::Retry {
                            request_id: request_id.clone(),
                            attempt: next,
                            delay_ms,
                            kind: error.kind,
                        })
                        .await;
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    info!(
                        attempts = attempt,
                        kind = %error.kind,
                        reason = %reason,
                        "router call failed"
                    );
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &HttpRequest,
        request_id: &str,
        attempt: u32,
    ) -> AttemptOutcome {
        let mut outbound = request.clone();
        if outbound.timeout.is_none() {
            outbound.timeout = Some(self.default_timeout);
        }
        if let Some(cookie_header) = self.cookies.header_for(&outbound.url) {
            outbound.set_header("cookie", cookie_header);
        }
        outbound.set_header(REQUEST_ID_HEADER, request_id);
        outbound.set_header("x-attempt", attempt.to_string());

        let method = outbound.method.to_string();
        let url = outbound.url.to_string();

        self.audit
            .add_log(AuditEvent::Request {
                request_id: request_id.to_string(),
                method: method.clone(),
                url: url.clone(),
                attempt,
            })
            .await;

        let started = Instant::now();
        let result = self.transport.send(&outbound).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (kind, message, status) = match result {
            Ok(response) => {
                // Cookies are applied before the caller sees the response, so any
                // call it issues next already carries them.
                self.apply_response_cookies(&outbound.url, &response);

                let Some(kind) = classify_status(response.status) else {
                    debug!(status = response.status, duration_ms, attempt, "router call succeeded");
                    self.audit
                        .add_log(AuditEvent::Response {
                            request_id: request_id.to_string(),
                            method,
                            url,
                            status: response.status,
                            duration_ms,
                            attempt,
                        })
                        .await;
                    return AttemptOutcome::Success(response);
                };
                (kind, format!("HTTP {}", response.status), Some(response.status))
            }
            Err(transport_error) => {
                let kind = classify_transport_error(&transport_error);
                (kind, describe_transport_error(&transport_error, kind), None)
            }
        };

        debug!(kind = %kind, ?status, duration_ms, attempt, "router call attempt failed");
        self.audit
            .add_log(AuditEvent::Error {
                request_id: request_id.to_string(),
                method: method.clone(),
                url: url.clone(),
                kind,
                message: message.clone(),
                status,
                duration_ms,
                attempt,
            })
            .await;

        AttemptOutcome::Failure(NetworkError {
            kind,
            message,
            status,
            request_id: request_id.to_string(),
            attempts: attempt,
            method,
            url,
        })
    }

    fn apply_response_cookies(&self, origin: &Url, response: &HttpResponse) {
        let raw = response.set_cookie_headers();
        if raw.is_empty() {
            return;
        }
        let cookies = parse_set_cookie_headers(&raw);
        if cookies.is_empty() {
            return;
        }

        let observer = self
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        match observer {
            Some(observer) => observer.on_cookies(origin, &cookies),
            None => self.cookies.absorb(origin, &cookies),
        }
    }
}

fn describe_transport_error(error: &TransportError, kind: NetworkErrorKind) -> String {
    if error.message.is_empty() {
        format!("{kind} failure")
    } else {
        error.message.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::audit::{AuditKind, MAX_ENTRIES};
    use crate::cookies::HeaderCookieStore;

    /// Replays a fixed script of outcomes, repeating the last one.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<HttpResponse, TransportError>>>,
        calls: AtomicU32,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    fn client_with(transport: Arc<ScriptedTransport>, max_attempts: u32) -> ResilientClient {
        ResilientClient::new(
            transport,
            RetryPolicy::new(max_attempts, Duration::from_millis(1)),
            Arc::new(HeaderCookieStore::default()),
            Arc::new(AuditLogStore::in_memory(MAX_ENTRIES)),
        )
    }

    fn probe() -> HttpRequest {
        HttpRequest::get(Url::parse("http://192.168.1.1/status").unwrap())
    }

    #[tokio::test]
    async fn test_success_first_attempt_logs_request_and_response() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(200))]);
        let client = client_with(Arc::clone(&transport), 3);

        let response = client.execute(probe()).await.unwrap();
        assert_eq!(response.status, 200);

        let logs = client.audit().all();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].event.kind(), AuditKind::Request);
        assert_eq!(logs[1].event.kind(), AuditKind::Response);
        assert_eq!(logs[0].event.request_id(), logs[1].event.request_id());
    }

    #[tokio::test]
    async fn test_server_error_retried_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(503)),
            Ok(HttpResponse::new(200)),
        ]);
        let client = client_with(Arc::clone(&transport), 3);

        client.execute(probe()).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        let kinds: Vec<AuditKind> = client.audit().all().iter().map(|e| e.event.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                AuditKind::Request,
                AuditKind::Error,
                AuditKind::Retry,
                AuditKind::Request,
                AuditKind::Response,
            ]
        );
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(403))]);
        let client = client_with(Arc::clone(&transport), 5);

        let error = client.execute(probe()).await.unwrap_err();
        assert_eq!(error.kind, NetworkErrorKind::Client);
        assert_eq!(error.status, Some(403));
        assert_eq!(error.attempts, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(client.audit().get_logs_by_type(AuditKind::Retry).is_empty());
    }

    #[tokio::test]
    async fn test_same_request_id_across_attempts() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::io(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))]);
        let client = client_with(Arc::clone(&transport), 3);

        let error = client.execute(probe()).await.unwrap_err();
        let ids: Vec<String> = transport
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.header("x-request-id").unwrap().to_string())
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| *id == error.request_id));
        assert_eq!(
            client.audit().get_logs_by_request_id(&error.request_id).len(),
            3 + 3 + 2
        );
    }

    #[tokio::test]
    async fn test_set_cookie_applied_to_next_call() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(200).with_header("set-cookie", "SESSIONID=abc; Path=/")),
            Ok(HttpResponse::new(200)),
        ]);
        let client = client_with(Arc::clone(&transport), 1);

        client.execute(probe()).await.unwrap();
        client.execute(probe()).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert!(seen[0].header("cookie").is_none());
        assert_eq!(seen[1].header("cookie"), Some("SESSIONID=abc"));
    }

    #[tokio::test]
    async fn test_default_timeout_attached() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(200))]);
        let client =
            client_with(Arc::clone(&transport), 1).with_default_timeout(Duration::from_secs(3));

        client.execute(probe()).await.unwrap();
        assert_eq!(
            transport.seen.lock().unwrap()[0].timeout,
            Some(Duration::from_secs(3))
        );
    }
}
