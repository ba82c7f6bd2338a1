//! One worker generation and its event dispatch table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info_span, Instrument};

use crate::cache::{CacheManager, CacheStats, CacheStorage};
use crate::config::WorkerConfig;
use crate::control::ControlMessage;
use crate::event::{EventCompletion, EventOutcome, ExtendableEvent, WorkerEvent};
use crate::intercept::{FetchInterceptor, Network};
use crate::lifecycle::{LifecycleController, WorkerState};
use crate::notification::{NotificationDispatcher, NotificationSink, WindowRegistry};
use crate::Result;

/// Host capabilities injected into a worker.
#[derive(Clone)]
pub struct Capabilities {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub notifications: Arc<dyn NotificationSink>,
    pub windows: Arc<dyn WindowRegistry>,
}

/// A service worker instance bound to one cache generation.
pub struct ServiceWorker {
    id: String,
    config: Arc<WorkerConfig>,
    cache: CacheManager,
    lifecycle: LifecycleController,
    interceptor: FetchInterceptor,
    notifications: NotificationDispatcher,
}

impl ServiceWorker {
    /// Build a worker for `config`, validating it first.
    pub fn new(config: WorkerConfig, capabilities: Capabilities) -> Result<Self> {
        config.validate()?;

        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!(
            "sw-{}-{}",
            config.version,
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        let cache = CacheManager::new(capabilities.storage, config.cache_name());
        let mut lifecycle = LifecycleController::new(
            id.clone(),
            cache.clone(),
            Arc::clone(&capabilities.network),
            Arc::clone(&capabilities.windows),
            config.precache_urls()?,
        );
        if config.skip_waiting_on_install {
            lifecycle.skip_waiting();
        }

        let interceptor = FetchInterceptor::new(
            capabilities.network,
            cache.clone(),
            config.app_shell_url()?,
            config.offline_response.clone(),
        );
        let notifications = NotificationDispatcher::new(
            capabilities.notifications,
            capabilities.windows,
            config.notifications.clone(),
            config.origin.clone(),
        );

        Ok(Self {
            id,
            config: Arc::new(config),
            cache,
            lifecycle,
            interceptor,
            notifications,
        })
    }

    /// Unique worker id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Name of this worker's cache generation.
    pub fn cache_name(&self) -> &str {
        self.cache.name()
    }

    /// Lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Whether activation may bypass waiting for windows to close.
    pub fn skip_waiting_requested(&self) -> bool {
        self.lifecycle.skip_waiting_requested()
    }

    /// Mark this worker as superseded.
    pub fn mark_redundant(&mut self) {
        self.lifecycle.mark_redundant();
    }

    /// Size of this generation's cache.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats().await
    }

    /// Delete every cache generation.
    pub async fn clear_caches(&self) -> Result<usize> {
        self.cache.clear_all().await
    }

    /// Deliver one event.
    ///
    /// The returned completion carries the event's lifetime; the host must
    /// settle it before tearing the worker down.
    pub async fn dispatch(&mut self, event: WorkerEvent) -> EventCompletion {
        let kind = event.kind();
        let span = info_span!("event", kind = %kind, worker = %self.id);
        let mut lifetime = ExtendableEvent::new(kind);

        let outcome = async {
            match event {
                WorkerEvent::Install => match self.lifecycle.install().await {
                    Ok(()) => EventOutcome::Installed,
                    Err(e) => EventOutcome::LifecycleFailed(e),
                },
                WorkerEvent::Activate => match self.lifecycle.activate().await {
                    Ok(deleted) => EventOutcome::Activated { deleted },
                    Err(e) => EventOutcome::LifecycleFailed(e),
                },
                WorkerEvent::Fetch(request) => {
                    match self.interceptor.handle(request, &mut lifetime).await {
                        Some(response) => EventOutcome::Responded(response),
                        None => EventOutcome::PassedThrough,
                    }
                }
                WorkerEvent::Push(raw) => {
                    match self.notifications.handle_push(raw, &mut lifetime).await {
                        Some(record) => EventOutcome::NotificationShown(record),
                        None => EventOutcome::NotificationSkipped,
                    }
                }
                WorkerEvent::NotificationClick { record, action } => EventOutcome::Click(
                    self.notifications
                        .handle_click(&record, action.as_deref())
                        .await,
                ),
                WorkerEvent::NotificationClose { record } => {
                    self.notifications.handle_close(&record);
                    EventOutcome::Closed
                }
                WorkerEvent::Message(message) => match ControlMessage::parse(&message) {
                    Some(ControlMessage::SkipWaiting) => {
                        self.lifecycle.skip_waiting();
                        EventOutcome::SkipWaiting
                    }
                    None => {
                        debug!(%message, "Ignoring unrecognized message");
                        EventOutcome::Ignored
                    }
                },
            }
        }
        .instrument(span)
        .await;

        EventCompletion {
            kind,
            outcome,
            lifetime,
        }
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("cache", &self.cache.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::event::EventKind;
    use crate::fetch::{FetchRequest, FetchResponse};
    use crate::testing::{FakeNetwork, FakeWindowRegistry, RecordingNotificationSink};
    use bytes::Bytes;
    use serde_json::json;
    use url::Url;

    fn config() -> WorkerConfig {
        WorkerConfig {
            precache: vec!["/".into()],
            skip_waiting_on_install: false,
            ..WorkerConfig::new(Url::parse("https://app.example/").unwrap(), "7")
        }
    }

    fn worker(network: Arc<FakeNetwork>) -> ServiceWorker {
        ServiceWorker::new(
            config(),
            Capabilities {
                storage: Arc::new(MemoryCacheStorage::new()),
                network,
                notifications: Arc::new(RecordingNotificationSink::new()),
                windows: Arc::new(FakeWindowRegistry::new()),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_lifecycle() {
        let network = Arc::new(FakeNetwork::new());
        network.respond(
            Url::parse("https://app.example/").unwrap(),
            FetchResponse::ok("text/html", "<shell>"),
        );
        let mut worker = worker(network);
        assert_eq!(worker.cache_name(), "reddpwa-cache-v7");

        let install = worker.dispatch(WorkerEvent::Install).await;
        assert_eq!(install.kind, EventKind::Install);
        assert!(matches!(install.outcome, EventOutcome::Installed));

        let activate = worker.dispatch(WorkerEvent::Activate).await;
        assert!(matches!(activate.outcome, EventOutcome::Activated { .. }));
        assert_eq!(worker.state(), WorkerState::Activated);
        assert_eq!(worker.cache_stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_dispatch_fetch_settles_cache_write() {
        let network = Arc::new(FakeNetwork::new());
        let target = Url::parse("https://app.example/api/files").unwrap();
        network.respond(
            Url::parse("https://app.example/").unwrap(),
            FetchResponse::ok("text/html", "<shell>"),
        );
        network.respond(target.clone(), FetchResponse::ok("application/json", "[]"));
        let mut worker = worker(network);
        worker.dispatch(WorkerEvent::Install).await.finish().await;

        let completion = worker.dispatch(WorkerEvent::Fetch(FetchRequest::get(target))).await;
        assert_eq!(completion.response().unwrap().text(), "[]");

        let (_, report) = completion.finish().await;
        assert_eq!(report.completed, 1);
        assert_eq!(worker.cache_stats().await.unwrap().entries, 2);
    }

    #[tokio::test]
    async fn test_dispatch_push_and_message() {
        let mut worker = worker(Arc::new(FakeNetwork::new()));

        let push = worker
            .dispatch(WorkerEvent::Push(Some(Bytes::from_static(b"hi"))))
            .await;
        assert!(matches!(push.outcome, EventOutcome::NotificationShown(_)));
        assert_eq!(push.lifetime.pending(), 1);

        let empty = worker.dispatch(WorkerEvent::Push(None)).await;
        assert!(matches!(empty.outcome, EventOutcome::NotificationSkipped));

        assert!(!worker.skip_waiting_requested());
        let ignored = worker.dispatch(WorkerEvent::Message(json!({ "type": "PING" }))).await;
        assert!(matches!(ignored.outcome, EventOutcome::Ignored));
        assert!(!worker.skip_waiting_requested());

        let skip = worker
            .dispatch(WorkerEvent::Message(json!({ "type": "SKIP_WAITING" })))
            .await;
        assert!(matches!(skip.outcome, EventOutcome::SkipWaiting));
        assert!(worker.skip_waiting_requested());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut bad = config();
        bad.version = String::new();
        let result = ServiceWorker::new(
            bad,
            Capabilities {
                storage: Arc::new(MemoryCacheStorage::new()),
                network: Arc::new(FakeNetwork::new()),
                notifications: Arc::new(RecordingNotificationSink::new()),
                windows: Arc::new(FakeWindowRegistry::new()),
            },
        );
        assert!(result.is_err());
    }
}
