//! HTTP transport seam.
//!
//! The resilient client only needs "send this request, give me the response
//! or a raw failure". [`ReqwestTransport`] is the production implementation;
//! tests substitute scripted transports.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use tracing::{debug, instrument};
use url::Url;

use super::error::TransportError;

/// HTTP method subset the router interface uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request.
///
/// Form values are redacted in `Debug` output since the login form carries
/// the router password.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    /// Extra headers, lower-case names.
    pub headers: Vec<(String, String)>,
    /// `application/x-www-form-urlencoded` body.
    pub form: Option<Vec<(String, String)>>,
    /// Whether 3xx responses are followed.
    pub follow_redirects: bool,
    /// Per-call timeout. The resilient client fills in its default when unset.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// A GET that follows redirects.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            form: None,
            follow_redirects: true,
            timeout: None,
        }
    }

    /// A form-encoded POST that follows redirects.
    #[must_use]
    pub fn post_form<K, V>(url: Url, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: HttpMethod::Post,
            url,
            headers: Vec::new(),
            form: Some(
                fields
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
            follow_redirects: true,
            timeout: None,
        }
    }

    /// Disables redirect following so a 3xx can be inspected.
    #[must_use]
    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(existing, _)| *existing != name);
        self.headers.push((name, value.into()));
    }

    /// Returns a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form_keys: Option<Vec<&str>> = self
            .form
            .as_ref()
            .map(|fields| fields.iter().map(|(key, _)| key.as_str()).collect());
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("form_keys", &form_keys)
            .field("follow_redirects", &self.follow_redirects)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A received response, fully buffered.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Headers in arrival order, lower-case names. Repeated headers stay separate.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Raw `Set-Cookie` values, one per header line.
    #[must_use]
    pub fn set_cookie_headers(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(name, _)| name == "set-cookie")
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Whether the status is one of the redirect codes a login form answers with.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == "location")
            .map(|(_, value)| value.as_str())
    }
}

/// Sends a single request; never retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport on reqwest.
///
/// Two clients share the same settings apart from the redirect policy, so a
/// login POST can observe its 302 while probes follow redirects normally.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    following: Client,
    non_following: Client,
}

impl ReqwestTransport {
    /// Builds both clients with the given connect timeout.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error (TLS backend initialisation).
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let following = Client::builder().connect_timeout(connect_timeout).build()?;
        let non_following = Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            following,
            non_following,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(
        level = "debug",
        skip(self, request),
        fields(method = %request.method, url = %request.url)
    )]
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.non_following
        };

        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        let mut builder = client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| TransportError::from_reqwest(&error))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|error| TransportError::from_reqwest(&error))?;

        debug!(status, bytes = body.len(), "response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
