//! HTTP/1.1 protocol types and parsing.
//!
//! This module provides the HTTP primitives shared by the proxy front end and
//! the upstream client: [`Method`], [`StatusCode`], [`Headers`], [`Request`],
//! and [`Response`].

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::{Request, RequestError};
pub use response::Response;

/// Returns the path and query of `url` with any fragment dropped.
///
/// Absolute URLs lose their `scheme://authority` part; an absolute URL with
/// no path yields `/`. Relative URLs are returned as-is (minus the fragment).
///
/// ```
/// use cacheroute::http::{url_path, url_path_and_query};
///
/// assert_eq!(url_path_and_query("http://example.com/a.css?v=1#x"), "/a.css?v=1");
/// assert_eq!(url_path("http://example.com/a.css?v=1"), "/a.css");
/// assert_eq!(url_path("http://example.com"), "/");
/// ```
pub fn url_path_and_query(url: &str) -> &str {
    let rest = match split_scheme(url) {
        Some((_, rest)) => rest.find(['/', '?']).map_or("", |i| &rest[i..]),
        None => url,
    };
    let rest = rest.split('#').next().unwrap_or_default();
    if rest.is_empty() { "/" } else { rest }
}

/// Splits an absolute URL into its scheme and everything after `://`.
///
/// Returns `None` for relative URLs, including ones that merely carry a URL
/// in their query string.
pub fn split_scheme(url: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = url.split_once("://")?;
    let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((scheme, rest))
}

/// Returns the path of `url` without query or fragment. See [`url_path_and_query`].
pub fn url_path(url: &str) -> &str {
    let pq = url_path_and_query(url);
    match pq.find('?') {
        Some(0) => "/",
        Some(i) => &pq[..i],
        None => pq,
    }
}

macro_rules! status_codes {
    ($( $(#[$doc:meta])* $name:ident = $code:literal, $reason:literal; )+) => {
        /// An HTTP response status code.
        ///
        /// Common codes have named variants; anything else an upstream sends
        /// is carried as [`Other`](Self::Other) so it can be passed through.
        ///
        /// # Examples
        ///
        /// ```
        /// use cacheroute::http::StatusCode;
        ///
        /// let status = StatusCode::Ok;
        /// assert_eq!(status.as_u16(), 200);
        /// assert_eq!(status.canonical_reason(), "OK");
        /// assert!(status.is_success());
        /// assert_eq!(StatusCode::try_from(418).unwrap(), StatusCode::Other(418));
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $( $(#[$doc])* $name, )+
            /// A valid code without a named variant.
            Other(u16),
        }

        impl StatusCode {
            /// Returns the numeric status code as a `u16`.
            pub fn as_u16(self) -> u16 {
                match self {
                    $( Self::$name => $code, )+
                    Self::Other(code) => code,
                }
            }

            /// Returns the canonical reason phrase, or `""` for unnamed codes.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $( Self::$name => $reason, )+
                    Self::Other(_) => "",
                }
            }

            fn from_known(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$name), )+
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    Continue = 100, "Continue";
    SwitchingProtocols = 101, "Switching Protocols";
    Ok = 200, "OK";
    Created = 201, "Created";
    Accepted = 202, "Accepted";
    NoContent = 204, "No Content";
    PartialContent = 206, "Partial Content";
    MovedPermanently = 301, "Moved Permanently";
    Found = 302, "Found";
    SeeOther = 303, "See Other";
    NotModified = 304, "Not Modified";
    TemporaryRedirect = 307, "Temporary Redirect";
    PermanentRedirect = 308, "Permanent Redirect";
    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    Gone = 410, "Gone";
    PayloadTooLarge = 413, "Payload Too Large";
    TooManyRequests = 429, "Too Many Requests";
    InternalServerError = 500, "Internal Server Error";
    NotImplemented = 501, "Not Implemented";
    /// Upstream unreachable and nothing cached.
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    /// Cache-only request with no cached entry.
    GatewayTimeout = 504, "Gateway Timeout";
}

impl StatusCode {
    /// Returns `true` for 2xx codes. Only these responses are ever written to a cache.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_reason() {
            "" => write!(f, "{}", self.as_u16()),
            reason => write!(f, "{} {}", self.as_u16(), reason),
        }
    }
}

/// Returned for numbers outside the three-digit status range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status code {0}")]
pub struct UnknownStatus(pub u16);

impl TryFrom<u16> for StatusCode {
    type Error = UnknownStatus;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        if !(100..=999).contains(&code) {
            return Err(UnknownStatus(code));
        }
        Ok(Self::from_known(code).unwrap_or(Self::Other(code)))
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Only `GET` is ever answered from a cache; every other method is
/// forwarded as-is, including extension methods kept in `Custom`.
///
/// ```
/// use cacheroute::http::Method;
///
/// let method: Method = "PURGE".parse().unwrap();
/// assert_eq!(method.as_str(), "PURGE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
