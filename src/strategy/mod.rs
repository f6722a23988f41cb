//! Caching strategies and the executor that runs them.
//!
//! | Strategy                 | Cache hit            | Cache miss                  | Network failure              |
//! |--------------------------|----------------------|-----------------------------|------------------------------|
//! | `cache-first`            | served, no fetch     | fetch, store, serve         | error                        |
//! | `network-first`          | only on failure      | fetch, store, serve         | cached entry, else error     |
//! | `cache-only`             | served               | error                       | never fetched                |
//! | `network-only`           | ignored              | fetch, serve, never stored  | error                        |
//! | `stale-while-revalidate` | served, refreshed in background | fetch, store, serve | background: logged only      |
//!
//! Only `2xx` responses are ever written, always into the dynamic namespace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{RequestKey, StorageError};
use crate::fetch::{FetchError, FetchRequest};
use crate::http::Method;

mod executor;

pub use executor::{Executor, Outcome, ResponseSource};

/// How a request is satisfied from cache versus network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    CacheOnly,
    NetworkOnly,
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheFirst => "cache-first",
            Self::NetworkFirst => "network-first",
            Self::CacheOnly => "cache-only",
            Self::NetworkOnly => "network-only",
            Self::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown caching strategy {0:?}")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "cache-first" => Self::CacheFirst,
            "network-first" => Self::NetworkFirst,
            "cache-only" => Self::CacheOnly,
            "network-only" => Self::NetworkOnly,
            "stale-while-revalidate" => Self::StaleWhileRevalidate,
            other => return Err(UnknownStrategy(other.to_owned())),
        })
    }
}

/// Why a strategy could not produce a response.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("cache storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("network request failed: {0}")]
    Network(#[from] FetchError),

    #[error("no cached response available for {key}")]
    NoCachedResponse { key: RequestKey },
}

/// Only `GET` requests to `http`/`https` URLs (or relative URLs) may touch
/// the cache. Everything else goes straight to the network.
pub fn is_cacheable(request: &FetchRequest) -> bool {
    *request.method() == Method::Get && matches!(request.scheme(), None | Some("http" | "https"))
}
