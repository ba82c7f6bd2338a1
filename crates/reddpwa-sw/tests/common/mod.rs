//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use reddpwa_sw::testing::{FakeNetwork, FakeWindowRegistry, RecordingNotificationSink};
use reddpwa_sw::worker::Capabilities;
use reddpwa_sw::{CacheStorage, FetchResponse, MemoryCacheStorage, ServiceWorker, WorkerConfig};
use url::Url;

pub const ORIGIN: &str = "https://reddpwa.example/";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// A fake host with every capability exposed for inspection.
pub struct Host {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<FakeNetwork>,
    pub notifications: Arc<RecordingNotificationSink>,
    pub windows: Arc<FakeWindowRegistry>,
}

impl Host {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryCacheStorage::new()))
    }

    pub fn with_storage(storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            storage,
            network: Arc::new(FakeNetwork::new()),
            notifications: Arc::new(RecordingNotificationSink::new()),
            windows: Arc::new(FakeWindowRegistry::new()),
        }
    }

    /// Serve the whole default manifest, tagging each body with `version`.
    pub fn serve_assets(&self, version: &str) {
        self.network
            .respond(url("/"), FetchResponse::ok("text/html", format!("<shell {version}>")));
        self.network.respond(
            url("/static/js/bundle.js"),
            FetchResponse::ok("text/javascript", format!("bundle {version}")),
        );
        self.network.respond(
            url("/static/css/main.css"),
            FetchResponse::ok("text/css", format!("css {version}")),
        );
        self.network.respond(
            url("/manifest.json"),
            FetchResponse::ok("application/json", "{}"),
        );
        self.network
            .respond(url("/logo192.png"), FetchResponse::ok("image/png", vec![0x89, b'P', b'N', b'G']));
    }

    pub fn config(&self, version: &str) -> WorkerConfig {
        WorkerConfig {
            skip_waiting_on_install: false,
            ..WorkerConfig::new(Url::parse(ORIGIN).unwrap(), version)
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            storage: self.storage.clone(),
            network: self.network.clone(),
            notifications: self.notifications.clone(),
            windows: self.windows.clone(),
        }
    }

    pub fn worker(&self, version: &str) -> ServiceWorker {
        ServiceWorker::new(self.config(version), self.capabilities()).unwrap()
    }
}
