use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::audit::unix_millis;
use crate::config::MAX_SESSION_TTL;
use crate::cookies::Cookie;

/// Authentication state of a [`super::SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
    Expired,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
        }
    }

    /// States in which a current session exists.
    #[must_use]
    pub fn has_session(self) -> bool {
        matches!(self, Self::Authenticated | Self::Refreshing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current authenticated session.
#[derive(Clone)]
pub struct Session {
    pub session_id: String,
    /// Name of the cookie carrying `session_id`.
    pub cookie_name: String,
    pub username: Option<String>,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    cookies: Vec<Cookie>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &redacted_id(&self.session_id))
            .field("cookie_name", &self.cookie_name)
            .field("username", &self.username)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("cookies", &self.cookies.len())
            .finish()
    }
}

impl Session {
    /// Builds a session from the cookie that carries its id.
    #[must_use]
    pub fn new(
        session_cookie: &Cookie,
        username: Option<String>,
        now: SystemTime,
        ttl: Duration,
        cookies: Vec<Cookie>,
    ) -> Self {
        Self {
            session_id: session_cookie.value().to_string(),
            cookie_name: session_cookie.name.clone(),
            username,
            created_at: now,
            expires_at: expiry_after(now, ttl),
            cookies,
        }
    }

    #[must_use]
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Folds cookies from a later response into the session.
    ///
    /// Returns `true` when the session cookie rotated to a new id.
    pub fn merge_cookies(&mut self, incoming: &[Cookie], pattern: &Regex) -> bool {
        for cookie in incoming {
            self.cookies.retain(|existing| existing.name != cookie.name);
            if !cookie.is_removal() {
                self.cookies.push(cookie.clone());
            }
        }

        let rotated = incoming.iter().find(|cookie| {
            !cookie.is_removal()
                && cookie.value() != self.session_id
                && (cookie.name == self.cookie_name || pattern.is_match(&cookie.name))
        });
        match rotated {
            Some(cookie) => {
                self.session_id = cookie.value().to_string();
                self.cookie_name = cookie.name.clone();
                true
            }
            None => false,
        }
    }
}

/// Durable form of a [`Session`]. Raw cookies are never stored; restoring
/// re-applies only `cookie_name=session_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub cookie_name: String,
    pub username: Option<String>,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            cookie_name: session.cookie_name.clone(),
            username: session.username.clone(),
            created_at_ms: unix_millis(session.created_at),
            expires_at_ms: unix_millis(session.expires_at),
        }
    }
}

impl PersistedSession {
    #[must_use]
    pub fn into_session(self) -> Session {
        let cookie = Cookie::new(self.cookie_name.clone(), self.session_id.clone());
        Session {
            session_id: self.session_id,
            cookie_name: self.cookie_name,
            username: self.username,
            created_at: UNIX_EPOCH + Duration::from_millis(self.created_at_ms),
            expires_at: UNIX_EPOCH + Duration::from_millis(self.expires_at_ms),
            cookies: vec![cookie],
        }
    }
}

/// Read-only snapshot of the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub username: Option<String>,
    pub expires_at_ms: Option<u64>,
}

/// `now + ttl`, with `ttl` clamped to [`MAX_SESSION_TTL`] so the sum cannot overflow.
pub(crate) fn expiry_after(now: SystemTime, ttl: Duration) -> SystemTime {
    now.checked_add(ttl.min(MAX_SESSION_TTL)).unwrap_or(now)
}

/// Short prefix of a session id, safe for logs.
pub(crate) fn redacted_id(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(4).collect();
    format!("{prefix}***")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pattern() -> Regex {
        regex::RegexBuilder::new("session")
            .case_insensitive(true)
            .build()
            .unwrap()
    }

    fn session() -> Session {
        let cookie = Cookie::new("SESSIONID", "abc123");
        Session::new(
            &cookie,
            Some("admin".to_string()),
            UNIX_EPOCH + Duration::from_secs(1_000),
            Duration::from_secs(1_800),
            vec![cookie.clone(), Cookie::new("theme", "dark")],
        )
    }

    #[test]
    fn test_oversized_ttl_is_clamped() {
        let now = SystemTime::now();
        let session = Session::new(
            &Cookie::new("SESSIONID", "abc123"),
            None,
            now,
            Duration::from_secs(u64::MAX),
            Vec::new(),
        );
        assert_eq!(session.expires_at, now + MAX_SESSION_TTL);
    }

    #[test]
    fn test_expiry_boundary() {
        let session = session();
        assert_eq!(session.expires_at, UNIX_EPOCH + Duration::from_secs(2_800));
        assert!(!session.is_expired_at(UNIX_EPOCH + Duration::from_secs(2_799)));
        assert!(session.is_expired_at(UNIX_EPOCH + Duration::from_secs(2_800)));
    }

    #[test]
    fn test_persisted_round_trip_keeps_only_session_cookie() {
        let persisted = PersistedSession::from(&session());
        assert_eq!(persisted.expires_at_ms, 2_800_000);

        let json = serde_json::to_string(&persisted).unwrap();
        assert!(!json.contains("dark"));

        let restored: PersistedSession = serde_json::from_str(&json).unwrap();
        let restored = restored.into_session();
        assert_eq!(restored.session_id, "abc123");
        assert_eq!(restored.cookies().len(), 1);
        assert_eq!(restored.cookies()[0].name, "SESSIONID");
        assert_eq!(restored.expires_at, UNIX_EPOCH + Duration::from_secs(2_800));
    }

    #[test]
    fn test_merge_cookies_detects_rotation() {
        let mut session = session();
        assert!(!session.merge_cookies(&[Cookie::new("theme", "light")], &pattern()));
        assert_eq!(session.session_id, "abc123");

        assert!(session.merge_cookies(&[Cookie::new("SESSIONID", "def456")], &pattern()));
        assert_eq!(session.session_id, "def456");
        assert_eq!(session.cookies().len(), 2);
    }

    #[test]
    fn test_merge_cookies_applies_removal() {
        let mut session = session();
        let mut removal = Cookie::new("theme", "");
        removal.expires_at = Some(UNIX_EPOCH);
        session.merge_cookies(&[removal], &pattern());
        assert_eq!(session.cookies().len(), 1);
    }

    #[test]
    fn test_debug_redacts_session_id() {
        let rendered = format!("{:?}", session());
        assert!(!rendered.contains("abc123"));
        assert!(rendered.contains("abc1***"));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(SessionState::Refreshing.to_string(), "refreshing");
        assert!(SessionState::Refreshing.has_session());
        assert!(!SessionState::Expired.has_session());
    }
}
