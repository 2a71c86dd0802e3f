use std::fmt;

use serde::Serialize;

use super::AuthError;

/// Coarse reason a login failed, enough for a UI to pick its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The router could not be reached (timeout, DNS, refused, network).
    Unreachable,
    /// The router answered but did not accept the credentials.
    Rejected,
    Unknown,
}

impl FailureCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a login.
///
/// Only constructible through [`AuthResult::succeeded`] and
/// [`AuthResult::failed`]: a success always carries a session id, a failure
/// always carries a message and a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResult {
    success: bool,
    session_id: Option<String>,
    message: Option<String>,
    error: Option<FailureCategory>,
}

impl AuthResult {
    #[must_use]
    pub fn succeeded(session_id: impl Into<String>) -> Self {
        Self {
            success: true,
            session_id: Some(session_id.into()),
            message: None,
            error: None,
        }
    }

    /// An empty `message` is replaced by a generic one naming the category.
    #[must_use]
    pub fn failed(category: FailureCategory, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("login failed ({category})")
        } else {
            message
        };
        Self {
            success: false,
            session_id: None,
            message: Some(message),
            error: Some(category),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn error(&self) -> Option<FailureCategory> {
        self.error
    }

    /// Converts into the session id, or an [`AuthError::Authentication`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Authentication`] for a failed login.
    pub fn into_result(self) -> Result<String, AuthError> {
        let Self {
            success,
            session_id,
            message,
            error,
        } = self;
        match (success, session_id) {
            (true, Some(session_id)) => Ok(session_id),
            _ => Err(AuthError::Authentication {
                category: error.unwrap_or(FailureCategory::Unknown),
                message: message.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_success_carries_session_id() {
        let result = AuthResult::succeeded("abc123");
        assert!(result.is_success());
        assert_eq!(result.session_id(), Some("abc123"));
        assert!(result.message().is_none());
        assert_eq!(result.into_result().unwrap(), "abc123");
    }

    #[test]
    fn test_failure_always_has_message() {
        let result = AuthResult::failed(FailureCategory::Unreachable, "  ");
        assert!(!result.is_success());
        assert_eq!(result.message(), Some("login failed (unreachable)"));
        assert_eq!(result.error(), Some(FailureCategory::Unreachable));
        assert!(result.session_id().is_none());
    }

    #[test]
    fn test_failure_into_result() {
        let err = AuthResult::failed(FailureCategory::Rejected, "bad password")
            .into_result()
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Authentication {
                category: FailureCategory::Rejected,
                ..
            }
        ));
        assert_eq!(err.to_string(), "authentication failed (rejected): bad password");
    }

    #[test]
    fn test_serializes_category_snake_case() {
        let json =
            serde_json::to_value(AuthResult::failed(FailureCategory::Rejected, "no")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "rejected");
    }
}
