use std::sync::Arc;
use std::time::SystemTime;

use tracing::{info, instrument, warn};
use url::Url;

use super::{AuthError, AuthResult, FailureCategory};
use crate::audit::{AuditEvent, AuditLogStore, AuthAction};
use crate::config::RouterConfig;
use crate::cookies::cookie_store_for;
use crate::network::{
    HttpRequest, NetworkErrorKind, ReqwestTransport, ResilientClient, Transport,
};
use crate::secrets::{MemorySecretStore, SecretStore, StoredCredentials};
use crate::session::{SessionInfo, SessionManager, SessionSettings};
use crate::storage::{KeyValueStore, MemoryKeyValueStore, keys};

/// Assembles an [`AuthService`] and everything it owns.
pub struct AuthServiceBuilder {
    config: RouterConfig,
    transport: Option<Arc<dyn Transport>>,
    kv: Option<Arc<dyn KeyValueStore>>,
    secrets: Option<Arc<dyn SecretStore>>,
}

impl AuthServiceBuilder {
    /// Replaces the default reqwest transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Durable state backend. Defaults to an in-memory store.
    #[must_use]
    pub fn key_value_store(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Credential backend. Defaults to an in-memory store.
    #[must_use]
    pub fn secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Validates the configuration, restores the audit log and any persisted
    /// session, and wires the service together.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for invalid configuration,
    /// [`AuthError::Storage`] if persisted state cannot be read, or
    /// [`AuthError::HttpClient`] if the default transport cannot be built.
    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    pub async fn build(self) -> Result<AuthService, AuthError> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.request_timeout)?),
        };
        let kv: Arc<dyn KeyValueStore> = self
            .kv
            .unwrap_or_else(|| Arc::new(MemoryKeyValueStore::new()));
        let secrets: Arc<dyn SecretStore> = self
            .secrets
            .unwrap_or_else(|| Arc::new(MemorySecretStore::new()));

        let audit = Arc::new(AuditLogStore::load(Arc::clone(&kv), config.audit_capacity).await?);
        let client = Arc::new(
            ResilientClient::new(
                transport,
                config.retry_policy(),
                cookie_store_for(config.cookie_strategy),
                audit,
            )
            .with_default_timeout(config.request_timeout),
        );
        let session = SessionManager::open(
            SessionSettings::from_config(&config)?,
            Arc::clone(&client),
            Arc::clone(&kv),
        )
        .await;

        info!(
            strategy = %config.cookie_strategy,
            persist_credentials = config.persist_credentials,
            state = %session.state(),
            "authentication service ready"
        );

        Ok(AuthService {
            login_url: config.login_url()?,
            logout_url: config.logout_url()?,
            config,
            client,
            session,
            kv,
            secrets,
            op_lock: tokio::sync::Mutex::new(()),
        })
    }
}

/// Login, logout, verification and recovery against one router.
///
/// Operations that change the session run one at a time; a login issued
/// while a refresh is in flight waits for it.
pub struct AuthService {
    config: RouterConfig,
    login_url: Url,
    logout_url: Url,
    client: Arc<ResilientClient>,
    session: SessionManager,
    kv: Arc<dyn KeyValueStore>,
    secrets: Arc<dyn SecretStore>,
    op_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("login_url", &self.login_url.as_str())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    #[must_use]
    pub fn builder(config: RouterConfig) -> AuthServiceBuilder {
        AuthServiceBuilder {
            config,
            transport: None,
            kv: None,
            secrets: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLogStore> {
        self.client.audit()
    }

    #[must_use]
    pub fn session_manager(&self) -> &SessionManager {
        &self.session
    }

    /// Logs in, replacing any current session.
    ///
    /// Success requires a redirect carrying a session cookie; anything else
    /// (including a plain 200) is a failure.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> AuthResult {
        let _op = self.op_lock.lock().await;
        self.login_locked(username, password).await
    }

    async fn login_locked(&self, username: &str, password: &str) -> AuthResult {
        self.log_auth(
            AuthAction::LoginAttempt,
            false,
            format!("login attempt for '{username}'"),
            None,
            Some(username),
        )
        .await;

        self.session.clear_session().await;
        let authenticating = self.session.begin_authentication();

        let request = HttpRequest::post_form(
            self.login_url.clone(),
            [("username", username), ("password", password)],
        )
        .without_redirects();

        let (category, message) = match self.client.execute(request).await {
            Ok(response) if response.is_redirect() => {
                match self
                    .session
                    .handle_login_response(Some(username), &response)
                    .await
                {
                    Some(session_id) => {
                        drop(authenticating);
                        self.remember_credentials(username, password).await;
                        self.log_auth(
                            AuthAction::LoginSuccess,
                            true,
                            "login succeeded",
                            Some(&session_id),
                            Some(username),
                        )
                        .await;
                        info!(username, "login succeeded");
                        return AuthResult::succeeded(session_id);
                    }
                    None => (
                        FailureCategory::Rejected,
                        format!(
                            "router redirected (HTTP {}) but set no session cookie",
                            response.status
                        ),
                    ),
                }
            }
            Ok(response) => (
                FailureCategory::Rejected,
                format!(
                    "router answered HTTP {} without redirect; credentials rejected",
                    response.status
                ),
            ),
            Err(error) if error.kind == NetworkErrorKind::Client => (
                FailureCategory::Rejected,
                format!("router rejected login: {error}"),
            ),
            Err(error) => {
                let category = if error.kind.is_unreachable() {
                    FailureCategory::Unreachable
                } else {
                    FailureCategory::Unknown
                };
                let message = format!("router unavailable: {error}");
                drop(authenticating);
                warn!(kind = %error.kind, attempts = error.attempts, "login failed");
                self.log_auth(AuthAction::LoginError, false, &message, None, Some(username))
                    .await;
                return AuthResult::failed(category, message);
            }
        };

        drop(authenticating);
        info!(username, "login rejected");
        self.log_auth(AuthAction::LoginFailed, false, &message, None, Some(username))
            .await;
        AuthResult::failed(category, message)
    }

    async fn remember_credentials(&self, username: &str, password: &str) {
        if !self.config.persist_credentials {
            return;
        }
        let credentials = StoredCredentials::new(username, password);
        match self.secrets.store_credentials(&credentials).await {
            Ok(()) => {
                self.log_auth(
                    AuthAction::CredentialsStored,
                    true,
                    "credentials stored for auto-login",
                    None,
                    Some(username),
                )
                .await;
            }
            Err(e) => {
                warn!(error = %e, "failed to store credentials");
                self.log_auth(
                    AuthAction::CredentialsStored,
                    false,
                    format!("failed to store credentials: {e}"),
                    None,
                    Some(username),
                )
                .await;
            }
        }
    }

    /// Ends the session on the router (best effort) and always locally.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Network`] when the router could not be reached.
    /// Local state is cleared regardless; any HTTP status counts as reached.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _op = self.op_lock.lock().await;
        let info = self.session.get_session_info();

        let remote = if info.session_id.is_some() {
            let request = HttpRequest::post_form(
                self.logout_url.clone(),
                std::iter::empty::<(String, String)>(),
            );
            match self.client.execute(request).await {
                Ok(_) => Ok(()),
                Err(error) if error.status.is_some() => Ok(()),
                Err(error) => Err(error),
            }
        } else {
            Ok(())
        };

        self.session.clear_session().await;

        let (success, detail) = match &remote {
            Ok(()) if info.session_id.is_some() => (true, "logged out".to_string()),
            Ok(()) => (true, "no active session; local state cleared".to_string()),
            Err(error) => {
                warn!(error = %error, "logout request failed; local session cleared anyway");
                (false, format!("logout request failed: {error}"))
            }
        };
        self.log_auth(
            AuthAction::Logout,
            success,
            detail,
            info.session_id.as_deref(),
            info.username.as_deref(),
        )
        .await;

        remote.map_err(AuthError::from)
    }

    /// Checks the session with the router, recovering through auto-login
    /// when credential persistence is enabled.
    #[instrument(skip(self))]
    pub async fn verify_session(&self) -> bool {
        let _op = self.op_lock.lock().await;
        let info = self.session.get_session_info();

        let detail = if info.session_id.is_none() {
            "no active session"
        } else if self.session.verify_session().await {
            self.log_auth(
                AuthAction::VerifySuccess,
                true,
                "session verified",
                info.session_id.as_deref(),
                info.username.as_deref(),
            )
            .await;
            return true;
        } else {
            "session rejected by router"
        };

        self.log_auth(
            AuthAction::VerifyFailed,
            false,
            detail,
            info.session_id.as_deref(),
            info.username.as_deref(),
        )
        .await;
        self.recover().await
    }

    /// Refreshes the session, recovering through auto-login when credential
    /// persistence is enabled.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> bool {
        let _op = self.op_lock.lock().await;
        let info = self.session.get_session_info();

        if self.session.refresh_session().await {
            let refreshed = self.session.get_session_info();
            self.log_auth(
                AuthAction::RefreshSuccess,
                true,
                "session refreshed",
                refreshed.session_id.as_deref(),
                refreshed.username.as_deref(),
            )
            .await;
            return true;
        }

        let detail = if info.session_id.is_none() {
            "no active session"
        } else {
            "session refresh failed"
        };
        self.log_auth(
            AuthAction::RefreshFailed,
            false,
            detail,
            info.session_id.as_deref(),
            info.username.as_deref(),
        )
        .await;
        self.recover().await
    }

    /// Logs in with stored credentials, if any.
    #[instrument(skip(self))]
    pub async fn try_auto_login(&self) -> bool {
        let _op = self.op_lock.lock().await;
        self.try_auto_login_locked().await
    }

    async fn recover(&self) -> bool {
        if self.config.persist_credentials {
            self.try_auto_login_locked().await
        } else {
            false
        }
    }

    async fn try_auto_login_locked(&self) -> bool {
        let credentials = match self.secrets.load_credentials().await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                self.log_auth(
                    AuthAction::AutoLoginSkipped,
                    false,
                    "no stored credentials",
                    None,
                    None,
                )
                .await;
                return false;
            }
            Err(e) => {
                warn!(error = %e, "stored credentials unreadable");
                self.log_auth(
                    AuthAction::AutoLoginSkipped,
                    false,
                    format!("stored credentials unreadable: {e}"),
                    None,
                    None,
                )
                .await;
                return false;
            }
        };

        self.log_auth(
            AuthAction::AutoLoginAttempt,
            false,
            "attempting auto-login with stored credentials",
            None,
            Some(&credentials.username),
        )
        .await;
        self.login_locked(&credentials.username, credentials.password())
            .await
            .is_success()
    }

    /// Whether a live session exists. No network call.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.state().has_session()
            && self
                .session
                .current_session()
                .is_some_and(|session| !session.is_expired_at(SystemTime::now()))
    }

    #[must_use]
    pub fn session_info(&self) -> SessionInfo {
        self.session.get_session_info()
    }

    /// # Errors
    ///
    /// Returns [`AuthError::SessionExpired`] when not authenticated.
    pub fn active_session(&self) -> Result<SessionInfo, AuthError> {
        if self.is_authenticated() {
            Ok(self.session.get_session_info())
        } else {
            Err(AuthError::SessionExpired)
        }
    }

    /// Deletes stored credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Secret`] if the secret store fails.
    #[instrument(skip(self))]
    pub async fn forget_credentials(&self) -> Result<(), AuthError> {
        self.secrets.clear_credentials().await?;
        self.log_auth(
            AuthAction::CredentialsCleared,
            true,
            "stored credentials removed",
            None,
            None,
        )
        .await;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the flag cannot be written.
    pub async fn set_biometric_enabled(&self, enabled: bool) -> Result<(), AuthError> {
        self.kv
            .set(keys::BIOMETRIC_ENABLED, if enabled { "true" } else { "false" })
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the flag cannot be read.
    pub async fn is_biometric_enabled(&self) -> Result<bool, AuthError> {
        Ok(self
            .kv
            .get(keys::BIOMETRIC_ENABLED)
            .await?
            .is_some_and(|value| value == "true"))
    }

    async fn log_auth(
        &self,
        action: AuthAction,
        success: bool,
        detail: impl Into<String>,
        session_id: Option<&str>,
        username: Option<&str>,
    ) {
        self.audit()
            .add_log(AuditEvent::auth(action, success, detail, session_id, username))
            .await;
    }
}
