//! Cached entries and their on-disk record format.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::http::{Headers, Method, Response, StatusCode};

/// Identity of a cacheable request: method plus absolute URL.
///
/// # Examples
///
/// ```
/// use cacheroute::cache::RequestKey;
/// use cacheroute::http::Method;
///
/// let key = RequestKey::new(&Method::Get, "http://localhost/index.html");
/// assert_eq!(key.as_str(), "GET http://localhost/index.html");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(method: &Method, url: &str) -> Self {
        Self(format!("{method} {url}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response. Entries are never mutated; a newer response for the
/// same key replaces the whole entry.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    key: RequestKey,
    namespace: String,
    stored_at: DateTime<Utc>,
    response: Response,
}

impl CachedEntry {
    pub fn new(
        namespace: impl Into<String>,
        key: RequestKey,
        response: Response,
        stored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            namespace: namespace.into(),
            stored_at,
            response,
        }
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Namespace the entry was found in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    /// Bytes charged against a store quota: key, headers, and body.
    pub fn size(&self) -> u64 {
        let headers: usize = self
            .response
            .headers()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        (self.key.0.len() + headers + self.response.body_ref().len()) as u64
    }
}

/// Serialized form of a [`CachedEntry`]. The namespace is implied by the
/// directory the record lives in.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EntryRecord {
    key: RequestKey,
    stored_at: DateTime<Utc>,
    status: u16,
    headers: Vec<(String, String)>,
    #[serde(serialize_with = "encode_body", deserialize_with = "decode_body")]
    body: Vec<u8>,
}

impl From<&CachedEntry> for EntryRecord {
    fn from(entry: &CachedEntry) -> Self {
        Self {
            key: entry.key.clone(),
            stored_at: entry.stored_at,
            status: entry.response.status().as_u16(),
            headers: entry
                .response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            body: entry.response.body_ref().to_vec(),
        }
    }
}

impl EntryRecord {
    pub(crate) fn into_entry(self, namespace: &str) -> Result<CachedEntry, String> {
        let status = StatusCode::try_from(self.status).map_err(|e| e.to_string())?;
        let headers: Headers = self.headers.into_iter().collect();
        let response = Response::from_parts(status, headers, Bytes::from(self.body));
        Ok(CachedEntry::new(namespace, self.key, response, self.stored_at))
    }
}

fn encode_body<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(body))
}

fn decode_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}
