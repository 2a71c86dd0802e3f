use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::state::{
    PersistedSession, Session, SessionInfo, SessionState, expiry_after, redacted_id,
};
use crate::audit::{AuditEvent, AuditLogStore, AuthAction, unix_millis};
use crate::config::{ConfigError, RouterConfig};
use crate::cookies::{Cookie, CookieStore, find_session_cookie, parse_set_cookie_headers};
use crate::network::{CookieObserver, HttpRequest, HttpResponse, ResilientClient};
use crate::storage::{KeyValueStore, StorageError, keys};

/// Session policy derived from [`RouterConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub refresh_margin: Duration,
    /// Authenticated page used to check the session.
    pub probe_url: Url,
    pub cookie_pattern: Regex,
}

impl SessionSettings {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the probe URL or cookie pattern is invalid.
    pub fn from_config(config: &RouterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            ttl: config.session_ttl,
            refresh_margin: config.refresh_margin,
            probe_url: config.probe_url()?,
            cookie_pattern: config.session_pattern()?,
        })
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: SessionState,
    session: Option<Session>,
}

struct RefreshTask {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    settings: SessionSettings,
    client: Arc<ResilientClient>,
    kv: Arc<dyn KeyValueStore>,
    slot: Mutex<Slot>,
    /// Serializes every state transition that awaits I/O.
    transition: tokio::sync::Mutex<()>,
    refresh: Mutex<Option<RefreshTask>>,
    /// Bumped on every schedule and cancel. A refresh task only runs if the
    /// generation it was spawned with is still current.
    generation: AtomicU64,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cookies(&self) -> &Arc<dyn CookieStore> {
        self.client.cookie_store()
    }

    fn audit(&self) -> &Arc<AuditLogStore> {
        self.client.audit()
    }

    fn cancel_refresh(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            debug!(generation = task.generation, "cancelling scheduled refresh");
            task.handle.abort();
        }
    }

    /// Takes the task with `generation` out of the slot so that later
    /// cancellation does not abort the caller mid-refresh.
    fn detach_refresh(&self, generation: u64) -> bool {
        let mut refresh = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        if refresh.as_ref().is_some_and(|task| task.generation == generation) {
            refresh.take();
            true
        } else {
            false
        }
    }

    async fn persist(&self, session: &Session) {
        let persisted = PersistedSession::from(session);
        let result = match serde_json::to_string(&persisted) {
            Ok(json) => self.kv.set(keys::SESSION, &json).await,
            Err(e) => Err(StorageError::invalid_value(keys::SESSION, e)),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist session");
        }
    }

    async fn forget_persisted(&self) {
        if let Err(e) = self.kv.remove(keys::SESSION).await {
            warn!(error = %e, "failed to remove persisted session");
        }
    }

    async fn log_auth(
        &self,
        action: AuthAction,
        success: bool,
        detail: &str,
        session: Option<&Session>,
    ) {
        self.audit()
            .add_log(AuditEvent::auth(
                action,
                success,
                detail,
                session.map(|s| s.session_id.as_str()),
                session.and_then(|s| s.username.as_deref()),
            ))
            .await;
    }

    /// Drops the current session after a failed check. Caller holds `transition`.
    async fn expire_locked(&self, detail: &str) {
        self.cancel_refresh();
        let session = {
            let mut slot = self.slot();
            slot.state = SessionState::Expired;
            slot.session.take()
        };
        self.cookies().clear();
        self.forget_persisted().await;
        info!(detail, "session expired");
        self.log_auth(AuthAction::SessionExpired, false, detail, session.as_ref())
            .await;
    }

    async fn probe(&self) -> Result<(), String> {
        self.client
            .execute(HttpRequest::get(self.settings.probe_url.clone()))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

impl CookieObserver for Inner {
    fn on_cookies(&self, origin: &Url, cookies: &[Cookie]) {
        self.cookies().absorb(origin, cookies);

        let mut slot = self.slot();
        if let Some(session) = slot.session.as_mut()
            && session.merge_cookies(cookies, &self.settings.cookie_pattern)
        {
            debug!(session = %redacted_id(&session.session_id), "session cookie rotated");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self
            .refresh
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.handle.abort();
        }
    }
}

/// Owns the session state machine.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

/// Holds the manager in `Authenticating` for the duration of a login.
///
/// Dropping it before the login completed (failure, error, or the login
/// future being cancelled) returns the manager to `Unauthenticated` and
/// discards any cookies the attempt left behind.
#[must_use = "the manager leaves `Authenticating` when the guard drops"]
pub struct AuthenticationGuard {
    inner: Arc<Inner>,
}

impl Drop for AuthenticationGuard {
    fn drop(&mut self) {
        let mut slot = self.inner.slot();
        if slot.state == SessionState::Authenticating {
            slot.state = SessionState::Unauthenticated;
            drop(slot);
            self.inner.cookies().clear();
        }
    }
}

/// Restores `Authenticated` if a refresh is abandoned half-way.
struct RefreshingGuard<'a> {
    inner: &'a Inner,
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.inner.slot();
        if slot.state == SessionState::Refreshing {
            slot.state = SessionState::Authenticated;
        }
    }
}

impl SessionManager {
    /// Creates the manager and restores any persisted session.
    ///
    /// A persisted session that already expired is discarded. Unreadable
    /// state is logged and discarded; the manager then starts unauthenticated.
    #[instrument(skip_all)]
    pub async fn open(
        settings: SessionSettings,
        client: Arc<ResilientClient>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        let inner = Arc::new(Inner {
            settings,
            client,
            kv,
            slot: Mutex::new(Slot::default()),
            transition: tokio::sync::Mutex::new(()),
            refresh: Mutex::new(None),
            generation: AtomicU64::new(0),
        });
        let observer: Weak<Inner> = Arc::downgrade(&inner);
        inner.client.set_cookie_observer(observer);

        let manager = Self { inner };
        manager.restore().await;
        manager
    }

    async fn restore(&self) {
        let inner = &self.inner;
        let raw = match inner.kv.get(keys::SESSION).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to read persisted session");
                return;
            }
        };

        let persisted: PersistedSession = match serde_json::from_str(&raw) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted session");
                inner.forget_persisted().await;
                return;
            }
        };

        let session = persisted.into_session();
        if session.is_expired_at(SystemTime::now()) {
            info!("persisted session already expired");
            inner.forget_persisted().await;
            inner
                .log_auth(
                    AuthAction::SessionExpired,
                    false,
                    "persisted session expired before restore",
                    Some(&session),
                )
                .await;
            return;
        }

        inner
            .cookies()
            .absorb(&inner.settings.probe_url, session.cookies());
        let expires_at = session.expires_at;
        inner
            .log_auth(
                AuthAction::SessionRestored,
                true,
                "restored persisted session",
                Some(&session),
            )
            .await;
        info!(session = %redacted_id(&session.session_id), "restored persisted session");
        {
            let mut slot = inner.slot();
            slot.state = SessionState::Authenticated;
            slot.session = Some(session);
        }
        self.schedule_refresh(expires_at);
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.slot().state
    }

    /// Snapshot of the current session. Never touches the network.
    #[must_use]
    pub fn get_session_info(&self) -> SessionInfo {
        let slot = self.inner.slot();
        let session = slot.session.as_ref();
        SessionInfo {
            state: slot.state,
            session_id: session.map(|s| s.session_id.clone()),
            username: session.and_then(|s| s.username.clone()),
            expires_at_ms: session.map(|s| unix_millis(s.expires_at)),
        }
    }

    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.inner.slot().session.clone()
    }

    /// Whether a refresh task is currently scheduled.
    #[must_use]
    pub fn has_scheduled_refresh(&self) -> bool {
        self.inner
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Moves to `Authenticating` until the returned guard drops or a login
    /// response is accepted.
    pub fn begin_authentication(&self) -> AuthenticationGuard {
        self.inner.slot().state = SessionState::Authenticating;
        AuthenticationGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Builds the session from a login response.
    ///
    /// Returns the session id, or `None` when no session cookie was set.
    #[instrument(skip(self, response), fields(status = response.status))]
    pub async fn handle_login_response(
        &self,
        username: Option<&str>,
        response: &HttpResponse,
    ) -> Option<String> {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        let cookies = parse_set_cookie_headers(&response.set_cookie_headers());
        let Some(session_cookie) = find_session_cookie(&cookies, &inner.settings.cookie_pattern)
        else {
            debug!(cookies = cookies.len(), "login response carried no session cookie");
            return None;
        };

        let session = Session::new(
            session_cookie,
            username.map(str::to_string),
            SystemTime::now(),
            inner.settings.ttl,
            cookies.clone(),
        );
        let session_id = session.session_id.clone();
        let expires_at = session.expires_at;

        inner.cancel_refresh();
        let store = inner.cookies();
        store.clear();
        store.absorb(&inner.settings.probe_url, session.cookies());

        inner.persist(&session).await;
        {
            let mut slot = inner.slot();
            slot.state = SessionState::Authenticated;
            slot.session = Some(session);
        }
        self.schedule_refresh(expires_at);

        info!(session = %redacted_id(&session_id), "session established");
        Some(session_id)
    }

    /// Probes the router with the current session.
    ///
    /// Any failure (including 401/403) expires and clears the session.
    #[instrument(skip(self))]
    pub async fn verify_session(&self) -> bool {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        let Some(before) = inner.slot().session.clone() else {
            debug!("no session to verify");
            return false;
        };
        if before.is_expired_at(SystemTime::now()) {
            inner.expire_locked("session lifetime elapsed").await;
            return false;
        }

        match inner.probe().await {
            Ok(()) => {
                let rotated = inner
                    .slot()
                    .session
                    .clone()
                    .filter(|now| now.session_id != before.session_id);
                if let Some(session) = rotated {
                    inner.persist(&session).await;
                }
                true
            }
            Err(message) => {
                inner
                    .expire_locked(&format!("session probe failed: {message}"))
                    .await;
                false
            }
        }
    }

    /// Re-validates the session and extends its lifetime.
    ///
    /// Failure expires and clears the session.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> bool {
        self.refresh_inner(None).await
    }

    async fn refresh_inner(&self, scheduled_generation: Option<u64>) -> bool {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        if let Some(generation) = scheduled_generation
            && inner.generation.load(Ordering::SeqCst) != generation
        {
            debug!(generation, "stale refresh task skipped");
            return false;
        }

        let expired = {
            let mut slot = inner.slot();
            if slot.state != SessionState::Authenticated {
                debug!(state = %slot.state, "nothing to refresh");
                return false;
            }
            let Some(session) = slot.session.as_ref() else {
                return false;
            };
            let expired = session.is_expired_at(SystemTime::now());
            if !expired {
                slot.state = SessionState::Refreshing;
            }
            expired
        };
        if expired {
            inner.expire_locked("session lifetime elapsed").await;
            return false;
        }

        let guard = RefreshingGuard { inner };
        match inner.probe().await {
            Ok(()) => {
                let refreshed = {
                    let mut slot = inner.slot();
                    slot.state = SessionState::Authenticated;
                    slot.session.as_mut().map(|session| {
                        session.expires_at = expiry_after(SystemTime::now(), inner.settings.ttl);
                        session.clone()
                    })
                };
                drop(guard);
                let Some(session) = refreshed else {
                    return false;
                };
                inner.persist(&session).await;
                self.schedule_refresh(session.expires_at);
                info!(session = %redacted_id(&session.session_id), "session refreshed");
                true
            }
            Err(message) => {
                drop(guard);
                inner
                    .expire_locked(&format!("session refresh failed: {message}"))
                    .await;
                false
            }
        }
    }

    /// Ends the session locally. Calling it again is a no-op.
    #[instrument(skip(self))]
    pub async fn clear_session(&self) {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        inner.cancel_refresh();
        let session = {
            let mut slot = inner.slot();
            slot.state = SessionState::Unauthenticated;
            slot.session.take()
        };
        inner.cookies().clear();
        inner.forget_persisted().await;

        if let Some(session) = session {
            info!(session = %redacted_id(&session.session_id), "session cleared");
            inner
                .log_auth(
                    AuthAction::SessionCleared,
                    true,
                    "session cleared",
                    Some(&session),
                )
                .await;
        }
    }

    fn schedule_refresh(&self, expires_at: SystemTime) {
        let inner = &self.inner;
        inner.cancel_refresh();
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let fire_at = expires_at
            .checked_sub(inner.settings.refresh_margin)
            .unwrap_or(expires_at);
        let delay = fire_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(generation, delay_ms, "scheduling session refresh");

        // Held across the spawn so the task cannot look for itself before it is stored.
        let mut refresh = inner.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        let weak = Arc::downgrade(inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.detach_refresh(generation) {
                return;
            }
            let manager = SessionManager { inner };
            let refreshed = manager.refresh_inner(Some(generation)).await;
            let (action, detail) = if refreshed {
                (AuthAction::RefreshSuccess, "scheduled refresh succeeded")
            } else {
                (AuthAction::RefreshFailed, "scheduled refresh failed")
            };
            let session = manager.current_session();
            manager
                .inner
                .log_auth(action, refreshed, detail, session.as_ref())
                .await;
        });

        *refresh = Some(RefreshTask { generation, handle });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::audit::{AuditKind, MAX_ENTRIES};
    use crate::cookies::HeaderCookieStore;
    use crate::network::{RetryPolicy, Transport, TransportError};
    use crate::storage::MemoryKeyValueStore;

    /// Answers every request with the configured probe status.
    struct ProbeTransport {
        status: StdMutex<u16>,
        calls: AtomicU32,
        cookies_seen: StdMutex<Vec<Option<String>>>,
    }

    impl ProbeTransport {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status: StdMutex::new(status),
                calls: AtomicU32::new(0),
                cookies_seen: StdMutex::new(Vec::new()),
            })
        }

        fn set_status(&self, status: u16) {
            *self.status.lock().unwrap() = status;
        }
    }

    #[async_trait]
    impl Transport for ProbeTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cookies_seen
                .lock()
                .unwrap()
                .push(request.header("cookie").map(str::to_string));
            Ok(HttpResponse::new(*self.status.lock().unwrap()))
        }
    }

    fn settings(ttl: Duration, margin: Duration) -> SessionSettings {
        let config = RouterConfig {
            session_ttl: ttl,
            refresh_margin: margin,
            ..RouterConfig::for_base_url("http://router.test")
        };
        SessionSettings::from_config(&config).unwrap()
    }

    fn client(transport: Arc<ProbeTransport>) -> Arc<ResilientClient> {
        Arc::new(ResilientClient::new(
            transport,
            RetryPolicy::new(1, Duration::from_millis(1)),
            Arc::new(HeaderCookieStore::default()),
            Arc::new(AuditLogStore::in_memory(MAX_ENTRIES)),
        ))
    }

    async fn manager_with(
        transport: Arc<ProbeTransport>,
        kv: Arc<MemoryKeyValueStore>,
    ) -> SessionManager {
        SessionManager::open(
            settings(Duration::from_secs(1800), Duration::from_secs(300)),
            client(transport),
            kv,
        )
        .await
    }

    fn login_response(session_id: &str) -> HttpResponse {
        HttpResponse::new(302)
            .with_header("location", "/index.html")
            .with_header("set-cookie", format!("SESSIONID={session_id}; Path=/"))
    }

    fn auth_actions(manager: &SessionManager) -> Vec<AuthAction> {
        manager
            .inner
            .audit()
            .get_logs_by_type(AuditKind::Auth)
            .iter()
            .filter_map(|entry| entry.event.auth_action())
            .collect()
    }

    #[tokio::test]
    async fn test_login_response_establishes_session() {
        let transport = ProbeTransport::new(200);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let manager = manager_with(Arc::clone(&transport), Arc::clone(&kv)).await;

        let guard = manager.begin_authentication();
        assert_eq!(manager.state(), SessionState::Authenticating);
        let id = manager
            .handle_login_response(Some("admin"), &login_response("abc123"))
            .await;
        drop(guard);

        assert_eq!(id.as_deref(), Some("abc123"));
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert!(manager.has_scheduled_refresh());
        assert!(kv.get(keys::SESSION).await.unwrap().is_some());

        let info = manager.get_session_info();
        assert_eq!(info.session_id.as_deref(), Some("abc123"));
        assert_eq!(info.username.as_deref(), Some("admin"));

        assert!(manager.verify_session().await);
        assert_eq!(
            transport.cookies_seen.lock().unwrap()[0].as_deref(),
            Some("SESSIONID=abc123")
        );
    }

    #[tokio::test]
    async fn test_login_response_without_cookie_rejected() {
        let manager =
            manager_with(ProbeTransport::new(200), Arc::new(MemoryKeyValueStore::new())).await;

        let guard = manager.begin_authentication();
        let id = manager
            .handle_login_response(Some("admin"), &HttpResponse::new(302))
            .await;
        drop(guard);

        assert!(id.is_none());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(!manager.has_scheduled_refresh());
    }

    #[tokio::test]
    async fn test_verify_rejection_expires_session() {
        let transport = ProbeTransport::new(200);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let manager = manager_with(Arc::clone(&transport), Arc::clone(&kv)).await;
        let _ = manager
            .handle_login_response(None, &login_response("abc123"))
            .await;

        transport.set_status(401);
        assert!(!manager.verify_session().await);
        assert_eq!(manager.state(), SessionState::Expired);
        assert!(manager.current_session().is_none());
        assert!(!manager.has_scheduled_refresh());
        assert!(kv.get(keys::SESSION).await.unwrap().is_none());
        assert!(auth_actions(&manager).contains(&AuthAction::SessionExpired));
    }

    #[tokio::test]
    async fn test_verify_without_session_skips_network() {
        let transport = ProbeTransport::new(200);
        let manager =
            manager_with(Arc::clone(&transport), Arc::new(MemoryKeyValueStore::new())).await;
        assert!(!manager.verify_session().await);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        let transport = ProbeTransport::new(200);
        let manager = manager_with(transport, Arc::new(MemoryKeyValueStore::new())).await;
        let _ = manager
            .handle_login_response(None, &login_response("abc123"))
            .await;
        let before = manager.current_session().unwrap().expires_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(manager.refresh_session().await);
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert!(manager.current_session().unwrap().expires_at > before);
        assert!(manager.has_scheduled_refresh());
    }

    #[tokio::test]
    async fn test_refresh_failure_expires() {
        let transport = ProbeTransport::new(200);
        let manager =
            manager_with(Arc::clone(&transport), Arc::new(MemoryKeyValueStore::new())).await;
        let _ = manager
            .handle_login_response(None, &login_response("abc123"))
            .await;

        transport.set_status(403);
        assert!(!manager.refresh_session().await);
        assert_eq!(manager.state(), SessionState::Expired);
        assert!(manager.current_session().is_none());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let manager =
            manager_with(ProbeTransport::new(200), Arc::new(MemoryKeyValueStore::new())).await;
        let _ = manager
            .handle_login_response(None, &login_response("abc123"))
            .await;

        manager.clear_session().await;
        manager.clear_session().await;

        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(!manager.has_scheduled_refresh());
        assert!(manager.inner.cookies().header_for(&manager.inner.settings.probe_url).is_none());
        let cleared = auth_actions(&manager)
            .into_iter()
            .filter(|action| *action == AuthAction::SessionCleared)
            .count();
        assert_eq!(cleared, 1);
    }

    #[tokio::test]
    async fn test_restore_reapplies_session_cookie() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let first = manager_with(ProbeTransport::new(200), Arc::clone(&kv)).await;
        let _ = first
            .handle_login_response(Some("admin"), &login_response("abc123"))
            .await;
        drop(first);

        let transport = ProbeTransport::new(200);
        let restored = manager_with(Arc::clone(&transport), kv).await;
        assert_eq!(restored.state(), SessionState::Authenticated);
        assert_eq!(
            restored.get_session_info().username.as_deref(),
            Some("admin")
        );
        assert!(auth_actions(&restored).contains(&AuthAction::SessionRestored));

        assert!(restored.verify_session().await);
        assert_eq!(
            transport.cookies_seen.lock().unwrap()[0].as_deref(),
            Some("SESSIONID=abc123")
        );
    }

    #[tokio::test]
    async fn test_restore_discards_expired_session() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let stale = PersistedSession {
            session_id: "old".to_string(),
            cookie_name: "SESSIONID".to_string(),
            username: None,
            created_at_ms: 1_000,
            expires_at_ms: 2_000,
        };
        kv.set(keys::SESSION, &serde_json::to_string(&stale).unwrap())
            .await
            .unwrap();

        let manager = manager_with(ProbeTransport::new(200), Arc::clone(&kv)).await;
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(manager.current_session().is_none());
        assert!(kv.get(keys::SESSION).await.unwrap().is_none());
        assert_eq!(auth_actions(&manager), vec![AuthAction::SessionExpired]);
    }

    #[tokio::test]
    async fn test_restore_discards_corrupt_state() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(keys::SESSION, "{not json").await.unwrap();

        let manager = manager_with(ProbeTransport::new(200), Arc::clone(&kv)).await;
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(kv.get(keys::SESSION).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scheduled_refresh_fires_before_expiry() {
        let transport = ProbeTransport::new(200);
        let manager = SessionManager::open(
            settings(Duration::from_millis(300), Duration::from_millis(250)),
            client(Arc::clone(&transport)),
            Arc::new(MemoryKeyValueStore::new()),
        )
        .await;
        let _ = manager
            .handle_login_response(None, &login_response("abc123"))
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(transport.calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert!(auth_actions(&manager).contains(&AuthAction::RefreshSuccess));
    }

    #[tokio::test]
    async fn test_clear_cancels_scheduled_refresh() {
        let transport = ProbeTransport::new(200);
        let manager = SessionManager::open(
            settings(Duration::from_millis(300), Duration::from_millis(250)),
            client(Arc::clone(&transport)),
            Arc::new(MemoryKeyValueStore::new()),
        )
        .await;
        let _ = manager
            .handle_login_response(None, &login_response("abc123"))
            .await;
        manager.clear_session().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_dropped_login_returns_to_unauthenticated() {
        let manager =
            manager_with(ProbeTransport::new(200), Arc::new(MemoryKeyValueStore::new())).await;
        {
            let _guard = manager.begin_authentication();
            assert_eq!(manager.state(), SessionState::Authenticating);
        }
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_rotated_cookie_updates_session() {
        let transport = ProbeTransport::new(200);
        let manager =
            manager_with(Arc::clone(&transport), Arc::new(MemoryKeyValueStore::new())).await;
        let _ = manager
            .handle_login_response(None, &login_response("abc123"))
            .await;

        manager.inner.on_cookies(
            &manager.inner.settings.probe_url,
            &[Cookie::new("SESSIONID", "rotated")],
        );
        assert_eq!(
            manager.get_session_info().session_id.as_deref(),
            Some("rotated")
        );
        assert_eq!(
            manager
                .inner
                .cookies()
                .header_for(&manager.inner.settings.probe_url)
                .as_deref(),
            Some("SESSIONID=rotated")
        );
    }
}
