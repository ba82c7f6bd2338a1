//! Install and activate transitions of one generation.

use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheManager};
use crate::fetch::{FetchRequest, RequestDestination};
use crate::intercept::Network;
use crate::notification::WindowRegistry;
use crate::{Result, ServiceWorkerError};

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, install not yet attempted.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// Drives one generation through install and activate.
pub struct LifecycleController {
    worker_id: String,
    cache: CacheManager,
    network: Arc<dyn Network>,
    windows: Arc<dyn WindowRegistry>,
    manifest: Vec<Url>,
    state: WorkerState,
    state_changed_at: Instant,
    skip_waiting: bool,
}

impl LifecycleController {
    /// Create a controller for a generation.
    pub fn new(
        worker_id: impl Into<String>,
        cache: CacheManager,
        network: Arc<dyn Network>,
        windows: Arc<dyn WindowRegistry>,
        manifest: Vec<Url>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            cache,
            network,
            windows,
            manifest,
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
            skip_waiting: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Time of last state change.
    pub fn state_changed_at(&self) -> Instant {
        self.state_changed_at
    }

    /// Whether activation should not wait for windows to close.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    /// Request activation without waiting for windows to close.
    pub fn skip_waiting(&mut self) {
        if !self.skip_waiting {
            debug!(worker = %self.worker_id, state = ?self.state, "Skip waiting requested");
        }
        self.skip_waiting = true;
    }

    /// Mark this generation as superseded.
    pub fn mark_redundant(&mut self) {
        self.set_state(WorkerState::Redundant);
    }

    fn set_state(&mut self, state: WorkerState) {
        debug!(worker = %self.worker_id, from = ?self.state, to = ?state, "State change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Precache every manifest resource into this generation's cache.
    ///
    /// Nothing is written unless every resource was fetched with a fully
    /// successful status; on failure the worker becomes redundant and any
    /// previous generation is left untouched.
    pub async fn install(&mut self) -> Result<()> {
        if self.state != WorkerState::Parsed {
            return Err(ServiceWorkerError::state(format!(
                "cannot install from {:?}",
                self.state
            )));
        }
        self.set_state(WorkerState::Installing);
        info!(worker = %self.worker_id, cache = %self.cache.name(), resources = self.manifest.len(), "Installing");

        match self.precache().await {
            Ok(()) => {
                self.set_state(WorkerState::Installed);
                info!(worker = %self.worker_id, "Installed");
                Ok(())
            }
            Err(e) => {
                warn!(worker = %self.worker_id, error = %e, "Install failed");
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<()> {
        let fetches = self.manifest.iter().map(|url| {
            let request = FetchRequest::get(url.clone()).destination(destination_for(url));
            let network = Arc::clone(&self.network);
            async move {
                let key = request.key();
                let response = network.fetch(&request).await.map_err(|e| {
                    ServiceWorkerError::Install(format!("{}: {}", request.url, e))
                })?;
                if !response.is_full_success() {
                    return Err(ServiceWorkerError::Install(format!(
                        "{}: status {}",
                        request.url, response.status
                    )));
                }
                Ok(CacheEntry::from_response(&key, &response))
            }
        });

        let entries = try_join_all(fetches).await?;
        self.cache.precache(entries).await
    }

    /// Delete every other generation, then claim all open windows.
    ///
    /// Returns the names of the deleted caches.
    pub async fn activate(&mut self) -> Result<Vec<String>> {
        if self.state != WorkerState::Installed {
            return Err(ServiceWorkerError::state(format!(
                "cannot activate from {:?}",
                self.state
            )));
        }
        self.set_state(WorkerState::Activating);
        info!(worker = %self.worker_id, cache = %self.cache.name(), "Activating");

        let deleted = match self.cache.prune_others().await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(worker = %self.worker_id, error = %e, "Failed to prune stale caches");
                self.set_state(WorkerState::Installed);
                return Err(e);
            }
        };

        match self.windows.claim(&self.worker_id).await {
            Ok(claimed) => debug!(worker = %self.worker_id, claimed, "Claimed windows"),
            Err(e) => warn!(worker = %self.worker_id, error = %e, "Failed to claim windows"),
        }

        self.set_state(WorkerState::Activated);
        info!(worker = %self.worker_id, deleted = deleted.len(), "Activated");
        Ok(deleted)
    }
}

/// Best-effort destination from the resource extension.
fn destination_for(url: &Url) -> RequestDestination {
    let path = url.path();
    if path.ends_with('/') || path.ends_with(".html") {
        RequestDestination::Document
    } else if path.ends_with(".js") {
        RequestDestination::Script
    } else if path.ends_with(".css") {
        RequestDestination::Style
    } else if path.ends_with(".json") || path.ends_with(".webmanifest") {
        RequestDestination::Manifest
    } else if [".png", ".jpg", ".jpeg", ".svg", ".ico", ".webp"]
        .iter()
        .any(|ext| path.ends_with(ext))
    {
        RequestDestination::Image
    } else {
        RequestDestination::Empty
    }
}
