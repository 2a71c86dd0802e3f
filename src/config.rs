//! Runtime configuration for a router profile.

use std::time::Duration;

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use url::Url;

use crate::audit::MAX_ENTRIES;
use crate::cookies::CookieStrategy;
use crate::network::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "http://192.168.1.1";
pub const DEFAULT_LOGIN_PATH: &str = "/login.cgi";
pub const DEFAULT_LOGOUT_PATH: &str = "/logout.cgi";
pub const DEFAULT_PROBE_PATH: &str = "/";
pub const DEFAULT_SESSION_COOKIE_PATTERN: &str = "session";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Fixed session lifetime granted on login or refresh.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// How long before expiry the background refresh fires.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Longest session lifetime accepted.
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base URL '{value}': {reason}")]
    InvalidBaseUrl { value: String, reason: String },

    #[error("`{field}` must start with '/', got '{value}'")]
    InvalidPath { field: &'static str, value: String },

    #[error("`max_attempts` must be at least 1")]
    ZeroAttempts,

    #[error("`request_timeout` must be greater than zero")]
    ZeroTimeout,

    #[error("`audit_capacity` must be at least 1")]
    ZeroCapacity,

    #[error(
        "refresh margin ({margin_secs}s) must be smaller than the session TTL ({ttl_secs}s)"
    )]
    RefreshMarginTooLarge { margin_secs: u64, ttl_secs: u64 },

    #[error("session TTL ({ttl_secs}s) exceeds the maximum of {max_secs}s")]
    SessionTtlTooLarge { ttl_secs: u64, max_secs: u64 },

    #[error("invalid session cookie pattern '{pattern}': {reason}")]
    InvalidCookiePattern { pattern: String, reason: String },
}

/// Everything needed to talk to one router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Scheme and host of the admin interface, e.g. `http://192.168.1.1`.
    pub base_url: String,
    pub login_path: String,
    pub logout_path: String,
    /// Authenticated page fetched to check that the session is still valid.
    pub probe_path: String,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub session_ttl: Duration,
    pub refresh_margin: Duration,
    /// Store credentials for auto-login. Off unless the user opts in.
    pub persist_credentials: bool,
    /// Case-insensitive regex matched against cookie names. A plain cookie
    /// name works too.
    pub session_cookie_pattern: String,
    pub cookie_strategy: CookieStrategy,
    pub audit_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            logout_path: DEFAULT_LOGOUT_PATH.to_string(),
            probe_path: DEFAULT_PROBE_PATH.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            session_ttl: DEFAULT_SESSION_TTL,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            persist_credentials: false,
            session_cookie_pattern: DEFAULT_SESSION_COOKIE_PATTERN.to_string(),
            cookie_strategy: CookieStrategy::default(),
            audit_capacity: MAX_ENTRIES,
        }
    }
}

impl RouterConfig {
    /// Default configuration pointed at `base_url`.
    #[must_use]
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Checks every value the service depends on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base()?;
        for (field, value) in [
            ("login_path", &self.login_path),
            ("logout_path", &self.logout_path),
            ("probe_path", &self.probe_path),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::InvalidPath {
                    field,
                    value: value.clone(),
                });
            }
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.audit_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.session_ttl > MAX_SESSION_TTL {
            return Err(ConfigError::SessionTtlTooLarge {
                ttl_secs: self.session_ttl.as_secs(),
                max_secs: MAX_SESSION_TTL.as_secs(),
            });
        }
        if self.refresh_margin >= self.session_ttl {
            return Err(ConfigError::RefreshMarginTooLarge {
                margin_secs: self.refresh_margin.as_secs(),
                ttl_secs: self.session_ttl.as_secs(),
            });
        }
        self.session_pattern()?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] or [`ConfigError::InvalidPath`].
    pub fn login_url(&self) -> Result<Url, ConfigError> {
        self.endpoint("login_path", &self.login_path)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] or [`ConfigError::InvalidPath`].
    pub fn logout_url(&self) -> Result<Url, ConfigError> {
        self.endpoint("logout_path", &self.logout_path)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] or [`ConfigError::InvalidPath`].
    pub fn probe_url(&self) -> Result<Url, ConfigError> {
        self.endpoint("probe_path", &self.probe_path)
    }

    /// Compiles the session cookie pattern, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCookiePattern`] for an empty or
    /// unparseable pattern.
    pub fn session_pattern(&self) -> Result<Regex, ConfigError> {
        let pattern = self.session_cookie_pattern.trim();
        if pattern.is_empty() {
            return Err(ConfigError::InvalidCookiePattern {
                pattern: self.session_cookie_pattern.clone(),
                reason: "pattern is empty".to_string(),
            });
        }
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidCookiePattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay)
    }

    fn base(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            value: self.base_url.clone(),
            reason,
        };
        let trimmed = self.base_url.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty".to_string()));
        }
        let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }

    fn endpoint(&self, field: &'static str, path: &str) -> Result<Url, ConfigError> {
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPath {
                field,
                value: path.to_string(),
            });
        }
        let base = self.base()?;
        base.join(path).map_err(|e| ConfigError::InvalidBaseUrl {
            value: self.base_url.clone(),
            reason: e.to_string(),
        })
    }
}
