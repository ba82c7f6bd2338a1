//! Request and response snapshots exchanged with the host.

use std::fmt;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::OfflineResponse;

/// Request mode, as seen by the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level navigation of a window.
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// What the fetched resource is going to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDestination {
    Document,
    Script,
    Style,
    Image,
    Manifest,
    Font,
    #[default]
    Empty,
}

/// Normalized request identity used as the cache key (method + URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Build a key; the URL fragment never takes part in the identity.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a `GET` of the given URL.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HeaderMap,

    /// Request body.
    pub body: Option<Bytes>,

    /// Request mode.
    pub mode: RequestMode,

    /// Request destination.
    pub destination: RequestDestination,

    /// Window the request originates from.
    pub client_id: Option<String>,
}

impl FetchRequest {
    /// Create a subresource `GET` request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::Cors,
            destination: RequestDestination::Empty,
            client_id: None,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: RequestDestination::Document,
            ..Self::get(url)
        }
        .header(ACCEPT, HeaderValue::from_static("text/html"))
    }

    /// Create a request with an arbitrary method and body.
    pub fn with_method(url: Url, method: Method, body: Option<Bytes>) -> Self {
        Self {
            method,
            body,
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Normalized identity of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }

    /// Whether this is a top-level navigation or document request.
    pub fn is_document(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == RequestDestination::Document
    }

    /// Whether the worker may serve this request from cache at all.
    ///
    /// Only side-effect free `GET`s over HTTP(S) qualify.
    pub fn is_interceptable(&self) -> bool {
        self.method == Method::GET && matches!(self.url.scheme(), "http" | "https")
    }
}

/// A response snapshot.
///
/// The body is reference counted, so cloning a response to feed both the
/// caller and the cache does not copy bytes.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Whether served from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a network response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            from_cache: false,
        }
    }

    /// Create a `200 OK` response with a content type.
    pub fn ok(content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self::new(StatusCode::OK, headers, body)
    }

    /// The synthesized response for a non-document request with no network and no cache.
    pub fn unavailable(offline: &OfflineResponse) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        let status =
            StatusCode::from_u16(offline.status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        Self::new(status, headers, offline.body.clone())
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the response is complete enough to be cached.
    ///
    /// Partial content never enters the cache.
    pub fn is_full_success(&self) -> bool {
        self.status.is_success() && self.status != StatusCode::PARTIAL_CONTENT
    }

    /// The `Content-Type` header, if valid UTF-8.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Body as lossy UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
