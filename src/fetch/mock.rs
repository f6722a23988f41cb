//! Scripted [`Fetch`] double shared by the crate's unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Fetch, FetchError, FetchRequest};
use crate::http::{Response, StatusCode};

/// Answers from a per-URL script and counts every call.
///
/// Unscripted URLs answer `404`. URLs marked with [`fail`](Self::fail) return a
/// timeout.
#[derive(Default)]
pub(crate) struct MockFetcher {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    responses: HashMap<String, (StatusCode, String)>,
    failing: HashSet<String>,
    calls: HashMap<String, usize>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, url: &str, status: StatusCode, body: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing.remove(url);
        state
            .responses
            .insert(url.to_owned(), (status, body.to_owned()));
    }

    pub(crate) fn fail(&self, url: &str) {
        self.state.lock().unwrap().failing.insert(url.to_owned());
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }
}

#[async_trait]
impl Fetch for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response, FetchError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(request.url().to_owned()).or_default() += 1;

        if state.failing.contains(request.url()) {
            return Err(FetchError::Timeout {
                url: request.url().to_owned(),
                timeout: Duration::ZERO,
            });
        }

        let (status, body) = state
            .responses
            .get(request.url())
            .cloned()
            .unwrap_or((StatusCode::NotFound, String::new()));
        Ok(Response::new(status).body(body))
    }
}
