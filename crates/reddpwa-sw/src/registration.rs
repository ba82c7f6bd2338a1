//! Generation hand-over.
//!
//! A [`Registration`] owns up to three workers: the one installing, the one
//! installed and waiting, and the one active. Functional events go to the
//! active worker only, so an older generation keeps serving until a newer one
//! has finished activating.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use url::Url;

use crate::event::{EventCompletion, EventOutcome, WorkerEvent};
use crate::fetch::FetchRequest;
use crate::notification::{NotificationRecord, WindowRegistry};
use crate::worker::ServiceWorker;
use crate::{Result, ServiceWorkerError};

/// Service worker registration for one scope.
pub struct Registration {
    scope: Url,
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
    windows: Arc<dyn WindowRegistry>,
    last_update_check: Option<Instant>,
}

impl Registration {
    /// Create an empty registration.
    pub fn new(scope: Url, windows: Arc<dyn WindowRegistry>) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            windows,
            last_update_check: None,
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn installing(&self) -> Option<&ServiceWorker> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&ServiceWorker> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// When a new generation was last registered.
    pub fn last_update_check(&self) -> Option<Instant> {
        self.last_update_check
    }

    /// Install a new generation and activate it if nothing holds it back.
    ///
    /// A failed install leaves the active generation in place and returns
    /// the install error.
    pub async fn register(&mut self, worker: ServiceWorker) -> Result<()> {
        self.last_update_check = Some(Instant::now());
        info!(scope = %self.scope, worker = %worker.id(), cache = %worker.cache_name(), "Registering");

        let installing = self.installing.insert(worker);
        let (outcome, _) = installing.dispatch(WorkerEvent::Install).await.finish().await;
        let Some(mut worker) = self.installing.take() else {
            return Err(ServiceWorkerError::state("installing worker vanished"));
        };

        match outcome {
            EventOutcome::Installed => {}
            EventOutcome::LifecycleFailed(e) => {
                worker.mark_redundant();
                return Err(e);
            }
            other => {
                worker.mark_redundant();
                return Err(ServiceWorkerError::state(format!(
                    "unexpected install outcome {other:?}"
                )));
            }
        }

        if let Some(mut replaced) = self.waiting.replace(worker) {
            debug!(worker = %replaced.id(), "Replaced waiting worker");
            replaced.mark_redundant();
        }

        self.try_activate().await?;
        Ok(())
    }

    /// Activate the waiting worker if skip-waiting was requested, nothing is
    /// active yet, or no window is open.
    ///
    /// Returns whether an activation happened.
    pub async fn try_activate(&mut self) -> Result<bool> {
        let Some(waiting) = self.waiting.as_ref() else {
            return Ok(false);
        };

        let ready = if waiting.skip_waiting_requested() || self.active.is_none() {
            true
        } else {
            match self.windows.match_all().await {
                Ok(windows) => windows.is_empty(),
                Err(e) => {
                    warn!(error = %e, "Failed to list windows, keeping worker waiting");
                    false
                }
            }
        };

        if !ready {
            debug!(worker = %waiting.id(), "Waiting for windows to close");
            return Ok(false);
        }

        self.activate_waiting().await?;
        Ok(true)
    }

    /// Activate the waiting worker now; the previous active worker becomes
    /// redundant.
    ///
    /// If activation fails the worker stays waiting.
    pub async fn activate_waiting(&mut self) -> Result<()> {
        let Some(mut worker) = self.waiting.take() else {
            return Err(ServiceWorkerError::state("no waiting worker"));
        };

        let (outcome, _) = worker.dispatch(WorkerEvent::Activate).await.finish().await;
        match outcome {
            EventOutcome::Activated { .. } => {
                if let Some(mut previous) = self.active.replace(worker) {
                    previous.mark_redundant();
                    info!(worker = %previous.id(), "Previous generation retired");
                }
                Ok(())
            }
            EventOutcome::LifecycleFailed(e) => {
                self.waiting = Some(worker);
                Err(e)
            }
            other => {
                self.waiting = Some(worker);
                Err(ServiceWorkerError::state(format!(
                    "unexpected activate outcome {other:?}"
                )))
            }
        }
    }

    /// Route a request to the active worker.
    ///
    /// `None` means no worker controls the scope and the host should perform
    /// the request itself.
    pub async fn fetch(&mut self, request: FetchRequest) -> Option<EventCompletion> {
        self.dispatch_active(WorkerEvent::Fetch(request)).await
    }

    /// Deliver a push message to the active worker.
    pub async fn push(&mut self, data: Option<Bytes>) -> Option<EventCompletion> {
        self.dispatch_active(WorkerEvent::Push(data)).await
    }

    /// Deliver a notification click to the active worker.
    pub async fn notification_click(
        &mut self,
        record: NotificationRecord,
        action: Option<String>,
    ) -> Option<EventCompletion> {
        self.dispatch_active(WorkerEvent::NotificationClick { record, action })
            .await
    }

    /// Deliver a notification dismissal to the active worker.
    pub async fn notification_close(
        &mut self,
        record: NotificationRecord,
    ) -> Option<EventCompletion> {
        self.dispatch_active(WorkerEvent::NotificationClose { record })
            .await
    }

    async fn dispatch_active(&mut self, event: WorkerEvent) -> Option<EventCompletion> {
        let Some(active) = self.active.as_mut() else {
            debug!(kind = %event.kind(), "No active worker");
            return None;
        };
        Some(active.dispatch(event).await)
    }

    /// Post a control message from the foreground application.
    ///
    /// The waiting worker receives it if there is one, otherwise the active
    /// worker. `SKIP_WAITING` promotes the waiting worker immediately.
    pub async fn post_message(&mut self, message: JsonValue) -> Option<EventCompletion> {
        let target = match (self.waiting.as_mut(), self.active.as_mut()) {
            (Some(waiting), _) => waiting,
            (None, Some(active)) => active,
            (None, None) => {
                debug!("No worker to receive message");
                return None;
            }
        };

        let completion = target.dispatch(WorkerEvent::Message(message)).await;
        if matches!(completion.outcome, EventOutcome::SkipWaiting) {
            if let Err(e) = self.try_activate().await {
                warn!(error = %e, "Skip waiting activation failed");
            }
        }
        Some(completion)
    }

    /// Re-check activation after windows opened or closed.
    pub async fn windows_changed(&mut self) -> Result<bool> {
        self.try_activate().await
    }

    /// Drop every worker and delete every cache generation.
    ///
    /// Returns the number of caches deleted.
    pub async fn unregister(&mut self) -> Result<usize> {
        let mut workers: Vec<ServiceWorker> = [
            self.installing.take(),
            self.waiting.take(),
            self.active.take(),
        ]
        .into_iter()
        .flatten()
        .collect();

        let deleted = match workers.first() {
            Some(worker) => worker.clear_caches().await?,
            None => 0,
        };
        for worker in &mut workers {
            worker.mark_redundant();
        }
        info!(scope = %self.scope, deleted, "Unregistered");
        Ok(deleted)
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("scope", &self.scope.as_str())
            .field("installing", &self.installing)
            .field("waiting", &self.waiting)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, MemoryCacheStorage};
    use crate::config::WorkerConfig;
    use crate::control::ControlMessage;
    use crate::fetch::FetchResponse;
    use crate::lifecycle::WorkerState;
    use crate::testing::{FakeNetwork, FakeWindowRegistry, RecordingNotificationSink};
    use crate::worker::Capabilities;

    struct Host {
        storage: Arc<MemoryCacheStorage>,
        network: Arc<FakeNetwork>,
        windows: Arc<FakeWindowRegistry>,
    }

    impl Host {
        fn new() -> Self {
            let network = Arc::new(FakeNetwork::new());
            network.respond(origin(), FetchResponse::ok("text/html", "<shell>"));
            Self {
                storage: Arc::new(MemoryCacheStorage::new()),
                network,
                windows: Arc::new(FakeWindowRegistry::new()),
            }
        }

        fn worker(&self, version: &str, skip_waiting: bool) -> ServiceWorker {
            let config = WorkerConfig {
                precache: vec!["/".into()],
                skip_waiting_on_install: skip_waiting,
                ..WorkerConfig::new(origin(), version)
            };
            ServiceWorker::new(
                config,
                Capabilities {
                    storage: self.storage.clone(),
                    network: self.network.clone(),
                    notifications: Arc::new(RecordingNotificationSink::new()),
                    windows: self.windows.clone(),
                },
            )
            .unwrap()
        }

        fn registration(&self) -> Registration {
            Registration::new(origin(), self.windows.clone())
        }
    }

    fn origin() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    #[tokio::test]
    async fn test_first_generation_activates() {
        let host = Host::new();
        let mut registration = host.registration();
        host.windows.add_window("https://app.example/");

        registration.register(host.worker("1", false)).await.unwrap();

        let active = registration.active().unwrap();
        assert_eq!(active.state(), WorkerState::Activated);
        assert!(registration.waiting().is_none());
        assert_eq!(host.windows.controller().as_deref(), Some(active.id()));
        assert!(registration.last_update_check().is_some());
    }

    #[tokio::test]
    async fn test_new_generation_waits_for_windows() {
        let host = Host::new();
        let mut registration = host.registration();
        let window = host.windows.add_window("https://app.example/");
        registration.register(host.worker("1", false)).await.unwrap();

        registration.register(host.worker("2", false)).await.unwrap();
        assert_eq!(registration.waiting().unwrap().state(), WorkerState::Installed);
        assert_eq!(registration.active().unwrap().cache_name(), "reddpwa-cache-v1");
        assert_eq!(host.storage.keys().await.unwrap().len(), 2);

        assert!(!registration.windows_changed().await.unwrap());
        host.windows.remove_window(&window);
        assert!(registration.windows_changed().await.unwrap());

        assert_eq!(registration.active().unwrap().cache_name(), "reddpwa-cache-v2");
        assert_eq!(host.storage.keys().await.unwrap(), vec!["reddpwa-cache-v2"]);
    }

    #[tokio::test]
    async fn test_skip_waiting_message_promotes() {
        let host = Host::new();
        let mut registration = host.registration();
        host.windows.add_window("https://app.example/");
        registration.register(host.worker("1", false)).await.unwrap();
        registration.register(host.worker("2", false)).await.unwrap();

        let completion = registration
            .post_message(ControlMessage::SkipWaiting.to_json())
            .await
            .unwrap();

        assert!(matches!(completion.outcome, EventOutcome::SkipWaiting));
        assert!(registration.waiting().is_none());
        assert_eq!(registration.active().unwrap().cache_name(), "reddpwa-cache-v2");
    }

    #[tokio::test]
    async fn test_skip_waiting_on_install() {
        let host = Host::new();
        let mut registration = host.registration();
        host.windows.add_window("https://app.example/");
        registration.register(host.worker("1", false)).await.unwrap();

        registration.register(host.worker("2", true)).await.unwrap();

        assert!(registration.waiting().is_none());
        assert_eq!(registration.active().unwrap().cache_name(), "reddpwa-cache-v2");
    }

    #[tokio::test]
    async fn test_failed_install_keeps_active() {
        let host = Host::new();
        let mut registration = host.registration();
        registration.register(host.worker("1", true)).await.unwrap();

        host.network.fail(origin());
        let err = registration.register(host.worker("2", true)).await.unwrap_err();

        assert!(matches!(err, ServiceWorkerError::Install(_)));
        assert!(registration.waiting().is_none());
        assert_eq!(registration.active().unwrap().cache_name(), "reddpwa-cache-v1");
        assert_eq!(host.storage.keys().await.unwrap(), vec!["reddpwa-cache-v1"]);
    }

    #[tokio::test]
    async fn test_fetch_without_active_passes_through() {
        let host = Host::new();
        let mut registration = host.registration();
        assert!(registration
            .fetch(FetchRequest::get(origin()))
            .await
            .is_none());
        assert!(registration.post_message(JsonValue::Null).await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_clears_caches() {
        let host = Host::new();
        let mut registration = host.registration();
        registration.register(host.worker("1", true)).await.unwrap();

        assert_eq!(registration.unregister().await.unwrap(), 1);
        assert!(registration.active().is_none());
        assert!(host.storage.keys().await.unwrap().is_empty());
    }
}
