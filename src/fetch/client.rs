//! Upstream client backed by [`reqwest`].
//!
//! Connections are pooled by the shared [`reqwest::Client`]. Responses are
//! buffered whole, up to a byte cap, because the cache stores complete
//! entries.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::debug;

use super::{Fetch, FetchError, FetchRequest};
use crate::http::headers::is_hop_by_hop;
use crate::http::{Headers, Response, StatusCode};

/// Default per-request deadline covering connect, send, and the whole body.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest upstream body we will buffer (32 MiB).
const DEFAULT_MAX_RESPONSE: usize = 32 * 1024 * 1024;

/// [`Fetch`] implementation for `http://` and `https://` origins.
///
/// Cloning shares the underlying connection pool.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use cacheroute::fetch::{Fetch, FetchRequest, HttpFetcher};
///
/// # async fn run() -> Result<(), cacheroute::fetch::FetchError> {
/// let fetcher = HttpFetcher::new().timeout(Duration::from_secs(5));
/// let response = fetcher.fetch(&FetchRequest::get("https://example.com/")).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_response_bytes: usize,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE,
        }
    }

    /// Sets the deadline for the whole exchange.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the largest response body that will be buffered.
    #[must_use]
    pub fn max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    fn failure(&self, url: &str, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_owned(),
                timeout: self.timeout,
            }
        } else {
            FetchError::Transport {
                url: url.to_owned(),
                source,
            }
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response, FetchError> {
        let url = reqwest::Url::parse(request.url()).map_err(|e| FetchError::InvalidUrl {
            url: request.url().to_owned(),
            reason: e.to_string(),
        })?;
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| FetchError::InvalidMethod(request.method().to_string()))?;

        let mut builder = self.client.request(method, url).timeout(self.timeout);
        for (name, value) in request.headers().iter() {
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let mut upstream = builder
            .send()
            .await
            .map_err(|e| self.failure(request.url(), e))?;

        let status = StatusCode::try_from(upstream.status().as_u16())?;

        let mut headers = Headers::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            match value.to_str() {
                Ok(value) => headers.insert(name.as_str(), value),
                Err(_) => debug!(header = %name, "skipping non-ASCII upstream header"),
            }
        }

        if upstream
            .content_length()
            .is_some_and(|len| len > self.max_response_bytes as u64)
        {
            return Err(FetchError::TooLarge {
                max_bytes: self.max_response_bytes,
            });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = upstream
            .chunk()
            .await
            .map_err(|e| self.failure(request.url(), e))?
        {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(FetchError::TooLarge {
                    max_bytes: self.max_response_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(
            method = %request.method(),
            url = request.url(),
            status = status.as_u16(),
            bytes = body.len(),
            "upstream response received"
        );

        Ok(Response::from_parts(status, headers, body.freeze()))
    }
}
