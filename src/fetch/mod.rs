//! The network collaborator: an opaque, asynchronous, fallible `fetch`.
//!
//! The cache engine only ever talks to the network through the [`Fetch`]
//! trait. [`HttpFetcher`] is the built-in `reqwest` implementation; tests and
//! embedders can supply their own.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::http::{
    Headers, Method, Response, UnknownStatus, split_scheme, url_path, url_path_and_query,
};

mod client;

pub use client::HttpFetcher;

#[cfg(test)]
pub(crate) mod mock;

/// Any way a fetch can fail. The engine treats every variant, timeouts
/// included, as "network failure".
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("method {0} cannot be sent upstream")]
    InvalidMethod(String),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} did not answer within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("upstream response exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("upstream sent an invalid status: {0}")]
    Status(#[from] UnknownStatus),
}

/// Performs a network request.
///
/// Implementations must be shareable across tasks: the stale-while-revalidate
/// strategy calls `fetch` from a detached background task.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response, FetchError>;
}

/// An outgoing request: method, absolute URL, headers, and body.
///
/// # Examples
///
/// ```
/// use cacheroute::fetch::FetchRequest;
///
/// let req = FetchRequest::get("http://localhost:3000/assets/app.css?v=3");
/// assert_eq!(req.scheme(), Some("http"));
/// assert_eq!(req.authority(), Some("localhost:3000"));
/// assert_eq!(req.path(), "/assets/app.css");
/// assert_eq!(req.path_and_query(), "/assets/app.css?v=3");
/// ```
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: String,
    headers: Headers,
    body: Bytes,
}

impl FetchRequest {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a bare `GET`.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the URL scheme, or `None` for a relative URL.
    pub fn scheme(&self) -> Option<&str> {
        split_scheme(&self.url).map(|(scheme, _)| scheme)
    }

    /// Returns the `host[:port]` part of an absolute URL.
    pub fn authority(&self) -> Option<&str> {
        let (_, rest) = split_scheme(&self.url)?;
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Returns the path and query with any fragment dropped.
    pub fn path_and_query(&self) -> &str {
        url_path_and_query(&self.url)
    }

    /// Returns the path without the query string.
    pub fn path(&self) -> &str {
        url_path(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_url_has_no_scheme_or_authority() {
        let req = FetchRequest::get("/api/contact?x=1");
        assert_eq!(req.scheme(), None);
        assert_eq!(req.authority(), None);
        assert_eq!(req.path(), "/api/contact");
        assert_eq!(req.path_and_query(), "/api/contact?x=1");
    }

    #[test]
    fn bare_origin_addresses_root() {
        let req = FetchRequest::get("https://example.com");
        assert_eq!(req.scheme(), Some("https"));
        assert_eq!(req.authority(), Some("example.com"));
        assert_eq!(req.path(), "/");
        assert_eq!(req.path_and_query(), "/");
    }

    #[test]
    fn url_in_query_is_not_a_scheme() {
        let req = FetchRequest::get("/login?next=http://evil/");
        assert_eq!(req.scheme(), None);
        assert_eq!(req.path(), "/login");
    }

    #[test]
    fn fragment_is_dropped() {
        let req = FetchRequest::get("http://example.com/index.html#top");
        assert_eq!(req.path_and_query(), "/index.html");
    }

    #[test]
    fn extension_scheme_is_reported() {
        let req = FetchRequest::get("chrome-extension://abcdef/popup.js");
        assert_eq!(req.scheme(), Some("chrome-extension"));
    }
}
