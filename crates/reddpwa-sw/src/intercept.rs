//! Network-first request interception with cache fallbacks.
//!
//! Fallback chain for an intercepted `GET`:
//!
//! ```text
//! network ──ok──► caller (+ background cache write when fully successful)
//!    │
//!  error
//!    ▼
//! cache[request] ──hit──► caller
//!    │
//!  miss
//!    ├── document ──► cache[app shell] ──miss──┐
//!    │                                          ▼
//!    └── other ─────────────────────────► synthesized 503
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::CacheManager;
use crate::config::OfflineResponse;
use crate::event::ExtendableEvent;
use crate::fetch::{FetchRequest, FetchResponse, RequestKey};
use crate::Result;

/// Outbound network access.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform a request.
    ///
    /// Any HTTP response, whatever its status, is `Ok`; `Err` means no
    /// response was obtained (offline, DNS, timeout).
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// Per-request policy of one generation.
#[derive(Clone)]
pub struct FetchInterceptor {
    network: Arc<dyn Network>,
    cache: CacheManager,
    app_shell: Url,
    offline: OfflineResponse,
}

impl FetchInterceptor {
    /// Create an interceptor serving from `cache`.
    pub fn new(
        network: Arc<dyn Network>,
        cache: CacheManager,
        app_shell: Url,
        offline: OfflineResponse,
    ) -> Self {
        Self {
            network,
            cache,
            app_shell,
            offline,
        }
    }

    /// Handle a fetch event.
    ///
    /// Returns `None` when the request is not intercepted and the host should
    /// perform it itself. A returned response never waits on the cache write;
    /// that write is registered on `event` instead.
    pub async fn handle(
        &self,
        request: FetchRequest,
        event: &mut ExtendableEvent,
    ) -> Option<FetchResponse> {
        if !request.is_interceptable() {
            trace!(url = %request.url, method = %request.method, "Passing request through");
            return None;
        }

        let key = request.key();

        match self.network.fetch(&request).await {
            Ok(response) => {
                if response.is_full_success() {
                    let cache = self.cache.clone();
                    let snapshot = response.clone();
                    event.wait_until(async move {
                        match cache.put(&key, &snapshot).await {
                            Ok(()) => {}
                            // Pruned by a newer generation while in flight.
                            Err(e) if e.is_not_found() => {
                                debug!(
                                    key = %key,
                                    cache = %cache.name(),
                                    "Cache gone, dropping refresh"
                                );
                            }
                            Err(e) => {
                                warn!(key = %key, error = %e, "Failed to refresh cache entry");
                            }
                        }
                    });
                } else {
                    trace!(key = %key, status = %response.status, "Response not cacheable");
                }
                Some(response)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Network failed, falling back to cache");
                Some(self.fallback(&request, &key).await)
            }
        }
    }

    async fn fallback(&self, request: &FetchRequest, key: &RequestKey) -> FetchResponse {
        if let Some(hit) = self.lookup(key).await {
            debug!(key = %key, "Served from cache");
            return hit;
        }

        if request.is_document() {
            if let Some(shell) = self.lookup(&RequestKey::get(&self.app_shell)).await {
                debug!(key = %key, shell = %self.app_shell, "Served app shell");
                return shell;
            }
            warn!(key = %key, "App shell missing from cache");
        }

        debug!(key = %key, status = self.offline.status, "Synthesized unavailable response");
        FetchResponse::unavailable(&self.offline)
    }

    async fn lookup(&self, key: &RequestKey) -> Option<FetchResponse> {
        match self.cache.match_request(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, MemoryCacheStorage};
    use crate::event::EventKind;
    use crate::fetch::RequestDestination;
    use crate::testing::FakeNetwork;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};

    const ORIGIN: &str = "https://app.example/";

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    async fn setup() -> (Arc<FakeNetwork>, CacheManager, FetchInterceptor) {
        let network = Arc::new(FakeNetwork::new());
        let cache = CacheManager::new(Arc::new(MemoryCacheStorage::new()), "reddpwa-cache-v5");
        cache.precache(Vec::new()).await.unwrap();
        let interceptor = FetchInterceptor::new(
            network.clone(),
            cache.clone(),
            url("/"),
            OfflineResponse::default(),
        );
        (network, cache, interceptor)
    }

    async fn run(interceptor: &FetchInterceptor, request: FetchRequest) -> Option<FetchResponse> {
        let mut event = ExtendableEvent::new(EventKind::Fetch);
        let response = interceptor.handle(request, &mut event).await;
        event.settle().await;
        response
    }

    #[tokio::test]
    async fn test_network_success_is_cached() {
        let (network, cache, interceptor) = setup().await;
        network.respond(url("/api/weather"), FetchResponse::ok("application/json", "sunny"));

        let response = run(&interceptor, FetchRequest::get(url("/api/weather")))
            .await
            .unwrap();
        assert_eq!(response.text(), "sunny");
        assert!(!response.from_cache);

        let cached = cache
            .match_request(&RequestKey::get(&url("/api/weather")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.text(), "sunny");
    }

    #[tokio::test]
    async fn test_error_status_is_returned_but_not_cached() {
        let (network, cache, interceptor) = setup().await;
        network.respond(
            url("/missing"),
            FetchResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), "nope"),
        );

        let response = run(&interceptor, FetchRequest::get(url("/missing")))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_offline_serves_cached_copy() {
        let (network, _cache, interceptor) = setup().await;
        network.respond(url("/static/css/main.css"), FetchResponse::ok("text/css", "v1"));
        run(&interceptor, FetchRequest::get(url("/static/css/main.css"))).await;

        network.set_offline(true);
        let response = run(&interceptor, FetchRequest::get(url("/static/css/main.css")))
            .await
            .unwrap();
        assert!(response.from_cache);
        assert_eq!(response.text(), "v1");
    }

    #[tokio::test]
    async fn test_offline_document_gets_shell() {
        let (network, cache, interceptor) = setup().await;
        cache
            .put(&RequestKey::get(&url("/")), &FetchResponse::ok("text/html", "<shell>"))
            .await
            .unwrap();
        network.set_offline(true);

        let response = run(&interceptor, FetchRequest::navigate(url("/weather")))
            .await
            .unwrap();
        assert_eq!(response.text(), "<shell>");
    }

    #[tokio::test]
    async fn test_offline_subresource_gets_unavailable() {
        let (network, _cache, interceptor) = setup().await;
        network.set_offline(true);

        let request =
            FetchRequest::get(url("/logo512.png")).destination(RequestDestination::Image);
        let response = run(&interceptor, request).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.content_type().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_offline_document_without_shell_gets_unavailable() {
        let (network, _cache, interceptor) = setup().await;
        network.set_offline(true);

        let response = run(&interceptor, FetchRequest::navigate(url("/files")))
            .await
            .unwrap();
        assert!(response.status.is_server_error());
    }

    #[tokio::test]
    async fn test_post_is_passed_through() {
        let (network, cache, interceptor) = setup().await;
        let request = FetchRequest::with_method(
            url("/upload"),
            Method::POST,
            Some(Bytes::from_static(b"data")),
        );

        assert!(run(&interceptor, request).await.is_none());
        assert_eq!(network.calls(), 0);
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_refresh_into_deleted_cache_is_dropped() {
        let (network, cache, interceptor) = setup().await;
        network.respond(url("/bundle.js"), FetchResponse::ok("text/javascript", "js"));

        let mut event = ExtendableEvent::new(EventKind::Fetch);
        interceptor
            .handle(FetchRequest::get(url("/bundle.js")), &mut event)
            .await
            .unwrap();
        cache.storage().delete(cache.name()).await.unwrap();

        let report = event.settle().await;
        assert_eq!(report.completed, 1);
        assert!(!cache.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_response_does_not_wait_for_cache_write() {
        let (network, cache, interceptor) = setup().await;
        network.respond(url("/bundle.js"), FetchResponse::ok("text/javascript", "js"));

        let mut event = ExtendableEvent::new(EventKind::Fetch);
        let response = interceptor
            .handle(FetchRequest::get(url("/bundle.js")), &mut event)
            .await;
        assert!(response.is_some());
        assert_eq!(event.pending(), 1);

        event.settle().await;
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }
}
