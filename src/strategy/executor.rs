//! Runs a [`Strategy`] against the cache store and the network.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Strategy, StrategyError, is_cacheable};
use crate::cache::{CacheStore, RequestKey};
use crate::clock::Clock;
use crate::fetch::{Fetch, FetchRequest};
use crate::http::Response;

/// Where the response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// A cached entry, with no network activity.
    Cache,
    /// The network, in the foreground.
    Network,
    /// A cached entry, while a background fetch refreshes it.
    Stale,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "hit",
            Self::Network => "miss",
            Self::Stale => "stale",
        }
    }
}

/// Result of running a strategy.
#[derive(Debug)]
pub struct Outcome {
    pub response: Response,
    pub source: ResponseSource,
    /// The background refresh started by stale-while-revalidate, if any.
    ///
    /// Dropping the handle detaches the task; it still runs to completion.
    pub revalidation: Option<JoinHandle<()>>,
}

impl Outcome {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self {
            response,
            source,
            revalidation: None,
        }
    }
}

/// Executes caching strategies. Cheap to clone; clones share the store,
/// fetcher, and clock.
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetch>,
    clock: Arc<dyn Clock>,
    dynamic_namespace: Arc<str>,
}

impl Executor {
    /// `dynamic_namespace` receives every response the strategies cache.
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetch>,
        clock: Arc<dyn Clock>,
        dynamic_namespace: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            dynamic_namespace: dynamic_namespace.into(),
        }
    }

    /// Produces a response for `request` following `strategy`.
    ///
    /// Requests that are not cacheable (see [`is_cacheable`]) are always run
    /// as network-only, whatever `strategy` says.
    ///
    /// # Errors
    ///
    /// - [`StrategyError::Network`] — the fetch failed and the strategy has no cache fallback.
    /// - [`StrategyError::NoCachedResponse`] — cache-only found nothing.
    /// - [`StrategyError::Storage`] — a cache read failed.
    pub async fn execute(
        &self,
        strategy: Strategy,
        request: &FetchRequest,
    ) -> Result<Outcome, StrategyError> {
        if !is_cacheable(request) {
            return self.network_only(request).await;
        }

        let key = RequestKey::new(request.method(), request.url());
        match strategy {
            Strategy::CacheFirst => self.cache_first(&key, request).await,
            Strategy::NetworkFirst => self.network_first(&key, request).await,
            Strategy::CacheOnly => self.cache_only(key).await,
            Strategy::NetworkOnly => self.network_only(request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&key, request).await,
        }
    }

    async fn cache_first(
        &self,
        key: &RequestKey,
        request: &FetchRequest,
    ) -> Result<Outcome, StrategyError> {
        if let Some(entry) = self.store.lookup(key).await? {
            return Ok(Outcome::new(entry.into_response(), ResponseSource::Cache));
        }

        let response = self.fetcher.fetch(request).await?;
        self.store_if_success(key, &response).await;
        Ok(Outcome::new(response, ResponseSource::Network))
    }

    async fn network_first(
        &self,
        key: &RequestKey,
        request: &FetchRequest,
    ) -> Result<Outcome, StrategyError> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_success(key, &response).await;
                Ok(Outcome::new(response, ResponseSource::Network))
            }
            Err(err) => {
                debug!(key = %key, error = %err, "network failed, trying cache");
                match self.store.lookup(key).await? {
                    Some(entry) => Ok(Outcome::new(entry.into_response(), ResponseSource::Cache)),
                    None => Err(err.into()),
                }
            }
        }
    }

    async fn cache_only(&self, key: RequestKey) -> Result<Outcome, StrategyError> {
        match self.store.lookup(&key).await? {
            Some(entry) => Ok(Outcome::new(entry.into_response(), ResponseSource::Cache)),
            None => Err(StrategyError::NoCachedResponse { key }),
        }
    }

    async fn network_only(&self, request: &FetchRequest) -> Result<Outcome, StrategyError> {
        let response = self.fetcher.fetch(request).await?;
        Ok(Outcome::new(response, ResponseSource::Network))
    }

    async fn stale_while_revalidate(
        &self,
        key: &RequestKey,
        request: &FetchRequest,
    ) -> Result<Outcome, StrategyError> {
        let Some(entry) = self.store.lookup(key).await? else {
            // Nothing stale to serve: the caller waits for the network.
            let response = self.fetcher.fetch(request).await?;
            self.store_if_success(key, &response).await;
            return Ok(Outcome::new(response, ResponseSource::Network));
        };

        let this = self.clone();
        let key = key.clone();
        let request = request.clone();
        let revalidation = tokio::spawn(async move {
            match this.fetcher.fetch(&request).await {
                Ok(response) => this.store_if_success(&key, &response).await,
                Err(err) => warn!(key = %key, error = %err, "background revalidation failed"),
            }
        });

        Ok(Outcome {
            response: entry.into_response(),
            source: ResponseSource::Stale,
            revalidation: Some(revalidation),
        })
    }

    // Write failures never fail the request: the response in hand is still good.
    async fn store_if_success(&self, key: &RequestKey, response: &Response) {
        if !response.status().is_success() {
            debug!(key = %key, status = %response.status(), "not caching unsuccessful response");
            return;
        }

        let result = self
            .store
            .put(&self.dynamic_namespace, key, response, self.clock.now())
            .await;
        match result {
            Ok(()) => debug!(key = %key, namespace = %self.dynamic_namespace, "response cached"),
            Err(err) if err.is_quota() => {
                warn!(key = %key, error = %err, "cache quota exhausted; response not cached");
            }
            Err(err) => warn!(key = %key, error = %err, "failed to cache response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::clock::FixedClock;
    use crate::fetch::mock::MockFetcher;
    use crate::http::{Method, StatusCode};

    const URL: &str = "http://origin/assets/app.js";

    struct Harness {
        store: Arc<MemoryCacheStore>,
        fetcher: Arc<MockFetcher>,
        executor: Executor,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(MockFetcher::new());
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()));
        let executor = Executor::new(store.clone(), fetcher.clone(), clock, "dynamic-v1");
        Harness {
            store,
            fetcher,
            executor,
        }
    }

    fn key(url: &str) -> RequestKey {
        RequestKey::new(&Method::Get, url)
    }

    fn body(outcome: &Outcome) -> &[u8] {
        outcome.response.body_ref().as_ref()
    }

    async fn cached_body(store: &MemoryCacheStore, url: &str) -> Option<Vec<u8>> {
        store
            .lookup(&key(url))
            .await
            .unwrap()
            .map(|e| e.response().body_ref().to_vec())
    }

    #[tokio::test]
    async fn cache_first_fetches_once() {
        let h = harness();
        h.fetcher.respond(URL, StatusCode::Ok, "v1");
        let req = FetchRequest::get(URL);

        let first = h.executor.execute(Strategy::CacheFirst, &req).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);

        h.fetcher.respond(URL, StatusCode::Ok, "v2");
        for _ in 0..3 {
            let again = h.executor.execute(Strategy::CacheFirst, &req).await.unwrap();
            assert_eq!(again.source, ResponseSource::Cache);
            assert_eq!(body(&again), b"v1");
        }
        assert_eq!(h.fetcher.calls(URL), 1);
    }

    #[tokio::test]
    async fn cache_first_refetches_after_namespace_deleted() {
        let h = harness();
        h.fetcher.respond(URL, StatusCode::Ok, "v1");
        let req = FetchRequest::get(URL);
        h.executor.execute(Strategy::CacheFirst, &req).await.unwrap();

        h.store.delete_namespace("dynamic-v1").await.unwrap();
        h.executor.execute(Strategy::CacheFirst, &req).await.unwrap();
        assert_eq!(h.fetcher.calls(URL), 2);
    }

    #[tokio::test]
    async fn cache_first_miss_with_network_failure_errors() {
        let h = harness();
        h.fetcher.fail(URL);
        let err = h
            .executor
            .execute(Strategy::CacheFirst, &FetchRequest::get(URL))
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::Network(_)));
    }

    #[tokio::test]
    async fn unsuccessful_responses_are_not_cached() {
        let h = harness();
        h.fetcher.respond(URL, StatusCode::NotFound, "gone");
        let out = h
            .executor
            .execute(Strategy::CacheFirst, &FetchRequest::get(URL))
            .await
            .unwrap();
        assert_eq!(out.response.status(), StatusCode::NotFound);
        assert!(cached_body(&h.store, URL).await.is_none());
    }

    #[tokio::test]
    async fn network_first_success_is_returned_and_cached() {
        let h = harness();
        let url = "http://origin/api/projects";
        h.fetcher.respond(url, StatusCode::Ok, "[1,2]");

        let out = h
            .executor
            .execute(Strategy::NetworkFirst, &FetchRequest::get(url))
            .await
            .unwrap();
        assert_eq!(out.source, ResponseSource::Network);
        assert_eq!(body(&out), b"[1,2]");

        let entry = h.store.lookup(&key(url)).await.unwrap().unwrap();
        assert_eq!(entry.namespace(), "dynamic-v1");
        assert_eq!(entry.stored_at(), Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn network_first_falls_back_to_cache() {
        let h = harness();
        let url = "http://origin/api/projects";
        h.fetcher.respond(url, StatusCode::Ok, "cached");
        let req = FetchRequest::get(url);
        h.executor.execute(Strategy::NetworkFirst, &req).await.unwrap();

        h.fetcher.fail(url);
        let out = h.executor.execute(Strategy::NetworkFirst, &req).await.unwrap();
        assert_eq!(out.source, ResponseSource::Cache);
        assert_eq!(body(&out), b"cached");
    }

    #[tokio::test]
    async fn network_first_falls_back_to_refreshed_copy() {
        let h = harness();
        let url = "http://origin/site.css";
        let installed = Response::new(StatusCode::Ok).body("installed");
        h.store.put("static-v1", &key(url), &installed, Utc::now()).await.unwrap();

        h.fetcher.respond(url, StatusCode::Ok, "refreshed");
        let req = FetchRequest::get(url);
        h.executor.execute(Strategy::NetworkFirst, &req).await.unwrap();

        h.fetcher.fail(url);
        let out = h.executor.execute(Strategy::NetworkFirst, &req).await.unwrap();
        assert_eq!(out.source, ResponseSource::Cache);
        assert_eq!(body(&out), b"refreshed");
    }

    #[tokio::test]
    async fn network_first_without_cache_fails_with_network_error() {
        let h = harness();
        let url = "http://origin/api/contact";
        h.fetcher.fail(url);
        let err = h
            .executor
            .execute(Strategy::NetworkFirst, &FetchRequest::get(url))
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::Network(_)));
    }

    #[tokio::test]
    async fn cache_only_never_touches_network() {
        let h = harness();
        h.fetcher.respond(URL, StatusCode::Ok, "net");
        let err = h
            .executor
            .execute(Strategy::CacheOnly, &FetchRequest::get(URL))
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::NoCachedResponse { .. }));

        let resp = Response::new(StatusCode::Ok).body("stored");
        h.store.put("static-v1", &key(URL), &resp, Utc::now()).await.unwrap();
        let out = h
            .executor
            .execute(Strategy::CacheOnly, &FetchRequest::get(URL))
            .await
            .unwrap();
        assert_eq!(body(&out), b"stored");
        assert_eq!(h.fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn network_only_never_caches() {
        let h = harness();
        h.fetcher.respond(URL, StatusCode::Ok, "net");
        let out = h
            .executor
            .execute(Strategy::NetworkOnly, &FetchRequest::get(URL))
            .await
            .unwrap();
        assert_eq!(body(&out), b"net");
        assert!(h.store.list_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_entry_is_served_then_refreshed() {
        let h = harness();
        let url = "http://origin/img/hero.webp";
        let old = Response::new(StatusCode::Ok).body("old");
        h.store.put("dynamic-v1", &key(url), &old, Utc::now()).await.unwrap();
        h.fetcher.respond(url, StatusCode::Ok, "new");

        let out = h
            .executor
            .execute(Strategy::StaleWhileRevalidate, &FetchRequest::get(url))
            .await
            .unwrap();
        assert_eq!(out.source, ResponseSource::Stale);
        assert_eq!(body(&out), b"old");

        out.revalidation.unwrap().await.unwrap();
        assert_eq!(cached_body(&h.store, url).await.unwrap(), b"new");

        let next = h
            .executor
            .execute(Strategy::StaleWhileRevalidate, &FetchRequest::get(url))
            .await
            .unwrap();
        assert_eq!(body(&next), b"new");
        if let Some(task) = next.revalidation {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn background_failure_is_swallowed() {
        let h = harness();
        let url = "http://origin/site.css";
        let old = Response::new(StatusCode::Ok).body("old");
        h.store.put("dynamic-v1", &key(url), &old, Utc::now()).await.unwrap();
        h.fetcher.fail(url);

        let out = h
            .executor
            .execute(Strategy::StaleWhileRevalidate, &FetchRequest::get(url))
            .await
            .unwrap();
        assert_eq!(body(&out), b"old");
        out.revalidation.unwrap().await.unwrap();
        assert_eq!(cached_body(&h.store, url).await.unwrap(), b"old");
    }

    #[tokio::test]
    async fn stale_miss_awaits_network() {
        let h = harness();
        let url = "http://origin/site.css";
        h.fetcher.respond(url, StatusCode::Ok, "fresh");

        let out = h
            .executor
            .execute(Strategy::StaleWhileRevalidate, &FetchRequest::get(url))
            .await
            .unwrap();
        assert_eq!(out.source, ResponseSource::Network);
        assert!(out.revalidation.is_none());
        assert_eq!(cached_body(&h.store, url).await.unwrap(), b"fresh");

        h.fetcher.fail("http://origin/missing.css");
        let err = h
            .executor
            .execute(
                Strategy::StaleWhileRevalidate,
                &FetchRequest::get("http://origin/missing.css"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::Network(_)));
    }

    #[tokio::test]
    async fn non_get_bypasses_cache_whatever_the_strategy() {
        let h = harness();
        let url = "http://origin/assets/upload";
        h.fetcher.respond(url, StatusCode::Ok, "accepted");
        let resp = Response::new(StatusCode::Ok).body("cached");
        h.store
            .put("dynamic-v1", &RequestKey::new(&Method::Post, url), &resp, Utc::now())
            .await
            .unwrap();

        for strategy in [Strategy::CacheFirst, Strategy::CacheOnly, Strategy::StaleWhileRevalidate] {
            let req = FetchRequest::new(Method::Post, url).with_body("data");
            let out = h.executor.execute(strategy, &req).await.unwrap();
            assert_eq!(out.source, ResponseSource::Network);
            assert_eq!(body(&out), b"accepted");
        }
        assert_eq!(h.fetcher.calls(url), 3);
        assert!(h.store.lookup(&key(url)).await.unwrap().is_none());
    }
}
