//! `Set-Cookie` header decoding and `Cookie` header encoding.
//!
//! Routers are sloppy about cookie syntax, so decoding is lenient: the first
//! `name=value` pair of each header is the cookie identity and any attribute
//! that cannot be understood is skipped rather than failing the whole header.

use std::fmt;
use std::time::{Duration, SystemTime};

use regex::Regex;
use tracing::{debug, warn};

/// A single cookie decoded from a `Set-Cookie` response header.
///
/// The value is redacted in `Debug` output; session cookie values are
/// bearer credentials for the router.
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive, never log).
    value: String,
    /// `Domain` attribute, if the router sent one.
    pub domain: Option<String>,
    /// `Path` attribute, if the router sent one.
    pub path: Option<String>,
    /// Absolute expiry from `Max-Age` or `Expires`.
    pub expires_at: Option<SystemTime>,
}

impl Cookie {
    /// Creates a cookie with no attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires_at: None,
        }
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive; avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether this cookie instructs the client to forget it.
    ///
    /// Routers clear sessions by sending an empty value or an expiry in the past.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.value.is_empty()
            || self
                .expires_at
                .is_some_and(|expires| expires <= SystemTime::now())
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Decodes raw `Set-Cookie` header values into cookies.
///
/// Headers without a usable `name=value` pair are skipped with a warning. When
/// the same name appears more than once, the later header wins, matching how a
/// browser would apply them in order.
pub fn parse_set_cookie_headers<S: AsRef<str>>(headers: &[S]) -> Vec<Cookie> {
    let mut cookies: Vec<Cookie> = Vec::new();

    for raw in headers {
        let Some(cookie) = parse_set_cookie(raw.as_ref()) else {
            warn!("skipping malformed Set-Cookie header");
            continue;
        };

        debug!(name = %cookie.name, "decoded Set-Cookie header");
        if let Some(existing) = cookies.iter_mut().find(|c| c.name == cookie.name) {
            *existing = cookie;
        } else {
            cookies.push(cookie);
        }
    }

    cookies
}

fn parse_set_cookie(raw: &str) -> Option<Cookie> {
    let mut segments = raw.split(';');
    let (name, value) = segments.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie::new(name, value.trim());
    let mut max_age = None;
    let mut expires = None;

    for segment in segments {
        let Some((key, attr_value)) = segment.split_once('=') else {
            // Flags such as `HttpOnly` / `Secure` carry nothing we track.
            continue;
        };
        let attr_value = attr_value.trim();

        match key.trim().to_ascii_lowercase().as_str() {
            "domain" if !attr_value.is_empty() => cookie.domain = Some(attr_value.to_string()),
            "path" if !attr_value.is_empty() => cookie.path = Some(attr_value.to_string()),
            "expires" => expires = httpdate::parse_http_date(attr_value).ok(),
            "max-age" => max_age = attr_value.parse::<i64>().ok(),
            _ => {}
        }
    }

    // Max-Age takes precedence over Expires (RFC 6265 section 5.3).
    cookie.expires_at = match max_age {
        Some(secs) if secs <= 0 => Some(SystemTime::UNIX_EPOCH),
        Some(secs) => SystemTime::now().checked_add(Duration::from_secs(secs.unsigned_abs())),
        None => expires,
    };

    Some(cookie)
}

/// Returns the first cookie whose name matches the session pattern.
///
/// Cookies that carry an empty value are ignored: they are removals, not sessions.
#[must_use]
pub fn find_session_cookie<'a>(cookies: &'a [Cookie], pattern: &Regex) -> Option<&'a Cookie> {
    cookies
        .iter()
        .find(|cookie| pattern.is_match(&cookie.name) && !cookie.value.is_empty())
}

/// Extracts the session identifier from a decoded cookie set.
#[must_use]
pub fn extract_session_id(cookies: &[Cookie], pattern: &Regex) -> Option<String> {
    find_session_cookie(cookies, pattern).map(|cookie| cookie.value.clone())
}

/// Serializes cookies into a `Cookie` request header value.
///
/// An empty set yields an empty string; callers omit the header in that case.
#[must_use]
pub fn build_cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}
