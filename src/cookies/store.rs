//! The outbound cookie set shared by every request.
//!
//! Two interchangeable backends exist: a manual header-string store and one
//! backed by reqwest's RFC 6265 cookie jar. Which one is used is picked once,
//! at construction, from [`CookieStrategy`].

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::cookie::{CookieStore as _, Jar};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::codec::{Cookie, build_cookie_header};

/// Selects the [`CookieStore`] backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieStrategy {
    /// Assemble the `Cookie` header by hand from name/value pairs.
    #[default]
    Header,
    /// Delegate domain/path matching to a structured cookie jar.
    Jar,
}

impl CookieStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Jar => "jar",
        }
    }
}

impl fmt::Display for CookieStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CookieStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(Self::Header),
            "jar" => Ok(Self::Jar),
            other => Err(format!("unknown cookie strategy '{other}' (expected header or jar)")),
        }
    }
}

/// Default outbound cookie set.
///
/// Writes must be visible to any request issued after the write returns, so
/// implementations apply updates synchronously.
pub trait CookieStore: Send + Sync + fmt::Debug {
    /// Merges cookies received from `origin` into the outbound set.
    /// Removal cookies (empty value or past expiry) delete the named entry.
    fn absorb(&self, origin: &Url, cookies: &[Cookie]);

    /// Returns the `Cookie` header value for a request to `url`, if any.
    fn header_for(&self, url: &Url) -> Option<String>;

    /// Drops every cookie.
    fn clear(&self);

    /// Backend in use.
    fn strategy(&self) -> CookieStrategy;
}

/// Builds the backend selected by `strategy`.
#[must_use]
pub fn cookie_store_for(strategy: CookieStrategy) -> Arc<dyn CookieStore> {
    match strategy {
        CookieStrategy::Header => Arc::new(HeaderCookieStore::default()),
        CookieStrategy::Jar => Arc::new(JarCookieStore::default()),
    }
}

/// Manual header assembly. Every cookie goes to every request; the router is
/// the only origin this process talks to.
#[derive(Default)]
pub struct HeaderCookieStore {
    cookies: RwLock<Vec<Cookie>>,
}

impl fmt::Debug for HeaderCookieStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("HeaderCookieStore")
            .field("cookies", &count)
            .finish()
    }
}

impl CookieStore for HeaderCookieStore {
    fn absorb(&self, _origin: &Url, cookies: &[Cookie]) {
        let mut stored = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        for cookie in cookies {
            stored.retain(|existing| existing.name != cookie.name);
            if !cookie.is_removal() {
                stored.push(cookie.clone());
            }
        }
        debug!(count = stored.len(), "outbound cookie header updated");
    }

    fn header_for(&self, _url: &Url) -> Option<String> {
        let stored = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        let header = build_cookie_header(&stored);
        (!header.is_empty()).then_some(header)
    }

    fn clear(&self) {
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn strategy(&self) -> CookieStrategy {
        CookieStrategy::Header
    }
}

/// Structured jar backend. The jar has no removal API, so `clear` swaps in a
/// fresh one.
#[derive(Debug, Default)]
pub struct JarCookieStore {
    jar: RwLock<Arc<Jar>>,
}

impl CookieStore for JarCookieStore {
    fn absorb(&self, origin: &Url, cookies: &[Cookie]) {
        let jar = Arc::clone(&self.jar.read().unwrap_or_else(PoisonError::into_inner));
        for cookie in cookies {
            jar.add_cookie_str(&build_jar_set_cookie(cookie), origin);
        }
        debug!(count = cookies.len(), origin = %origin, "cookies added to jar");
    }

    fn header_for(&self, url: &Url) -> Option<String> {
        let jar = Arc::clone(&self.jar.read().unwrap_or_else(PoisonError::into_inner));
        let value = jar.cookies(url)?;
        match value.to_str() {
            Ok(header) if !header.is_empty() => Some(header.to_string()),
            Ok(_) => None,
            Err(_) => {
                warn!(url = %url, "cookie jar produced a non-ASCII header; omitting");
                None
            }
        }
    }

    fn clear(&self) {
        *self.jar.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Jar::default());
    }

    fn strategy(&self) -> CookieStrategy {
        CookieStrategy::Jar
    }
}

/// Rebuilds a `Set-Cookie` string for the jar.
///
/// Cookies are stored host-only: routers frequently answer on a bare IP where
/// a `Domain` attribute would be rejected. A missing path widens to `/` so the
/// session cookie set by the login endpoint is sent to every page.
fn build_jar_set_cookie(cookie: &Cookie) -> String {
    let mut parts = vec![format!("{}={}", cookie.name, cookie.value())];
    parts.push(format!("Path={}", cookie.path.as_deref().unwrap_or("/")));

    if cookie.is_removal() {
        parts.push("Max-Age=0".to_string());
    } else if let Some(expires_at) = cookie.expires_at {
        parts.push(format!("Expires={}", httpdate::fmt_http_date(expires_at)));
    }

    parts.join("; ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn router_url() -> Url {
        Url::parse("http://192.168.1.1/index.html").unwrap()
    }

    fn assert_store_behaviour(store: &dyn CookieStore) {
        let url = router_url();
        assert!(store.header_for(&url).is_none());

        store.absorb(&url, &[Cookie::new("SESSIONID", "abc123")]);
        assert_eq!(store.header_for(&url).as_deref(), Some("SESSIONID=abc123"));

        store.absorb(&url, &[Cookie::new("SESSIONID", "def456")]);
        assert_eq!(store.header_for(&url).as_deref(), Some("SESSIONID=def456"));

        store.absorb(&url, &[Cookie::new("SESSIONID", "")]);
        assert!(store.header_for(&url).is_none());

        store.absorb(&url, &[Cookie::new("a", "1"), Cookie::new("b", "2")]);
        store.clear();
        assert!(store.header_for(&url).is_none());
    }

    #[test]
    fn test_header_store_behaviour() {
        assert_store_behaviour(&HeaderCookieStore::default());
    }

    #[test]
    fn test_jar_store_behaviour() {
        assert_store_behaviour(&JarCookieStore::default());
    }

    #[test]
    fn test_cookie_store_for_selects_backend() {
        assert_eq!(
            cookie_store_for(CookieStrategy::Header).strategy(),
            CookieStrategy::Header
        );
        assert_eq!(
            cookie_store_for(CookieStrategy::Jar).strategy(),
            CookieStrategy::Jar
        );
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Header".parse::<CookieStrategy>().unwrap(), CookieStrategy::Header);
        assert_eq!(" jar ".parse::<CookieStrategy>().unwrap(), CookieStrategy::Jar);
        assert!("browser".parse::<CookieStrategy>().is_err());
    }

    #[test]
    fn test_header_store_debug_hides_values() {
        let store = HeaderCookieStore::default();
        store.absorb(&router_url(), &[Cookie::new("SESSIONID", "secret-value")]);
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret-value"));
    }
}
