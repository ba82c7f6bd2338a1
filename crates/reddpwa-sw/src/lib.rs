//! # REDDPWA Service Worker
//!
//! The background worker behind the REDDPWA client application: it intercepts
//! outgoing requests, serves them from a versioned durable cache when the
//! network is unavailable, and renders push notifications whose clicks are
//! routed back to open application windows.
//!
//! ## Features
//!
//! - **Lifecycle**: install (all-or-nothing precache), activate (prune old
//!   generations, then claim windows)
//! - **Fetch interception**: network-first with cache, app shell and
//!   synthesized-unavailable fallbacks
//! - **Push notifications**: tolerant payload decoding, defaults merging,
//!   click routing to existing or new windows
//! - **Control channel**: `{ "type": "SKIP_WAITING" }`
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     ├── installing / waiting / active (ServiceWorker)
//!     └── WindowRegistry
//!
//! ServiceWorker::dispatch(WorkerEvent)
//!     ├── Install / Activate ─────► LifecycleController ─┐
//!     ├── Fetch ──────────────────► FetchInterceptor ────┼──► CacheManager ──► CacheStorage
//!     ├── Push / Click / Close ───► NotificationDispatcher ──► NotificationSink, WindowRegistry
//!     └── Message ────────────────► ControlMessage
//! ```
//!
//! Every host capability (cache storage, network, notification rendering,
//! window list) is an injected trait object, so each handler can be driven
//! with the fakes in [`testing`].

use thiserror::Error;

pub mod cache;
pub mod config;
pub mod control;
pub mod event;
pub mod fetch;
pub mod intercept;
pub mod lifecycle;
pub mod notification;
pub mod push;
pub mod registration;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{
    CacheEntry, CacheManager, CacheStats, CacheStorage, MemoryCacheStorage, SqliteCacheStorage,
};
pub use config::{NotificationDefaults, OfflineResponse, WorkerConfig};
pub use control::ControlMessage;
pub use event::{
    EventCompletion, EventKind, EventOutcome, ExtendableEvent, SettleReport, WorkerEvent,
};
pub use fetch::{FetchRequest, FetchResponse, RequestDestination, RequestKey, RequestMode};
pub use intercept::{FetchInterceptor, Network};
pub use lifecycle::{LifecycleController, WorkerState};
pub use notification::{
    ClickOutcome, NotificationAction, NotificationData, NotificationDispatcher,
    NotificationRecord, NotificationSink, PermissionState, PushPayload, WindowClient,
    WindowRegistry,
};
pub use push::{ApplicationServerKey, PushSubscriptionOptions};
pub use registration::Registration;
pub use worker::{Capabilities, ServiceWorker};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Install failed: {0}")]
    Install(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ServiceWorkerError {
    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a state error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Whether a named resource (cache, window) was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the failure came from the network rather than local storage.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<rusqlite::Error> for ServiceWorkerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceWorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for ServiceWorkerError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<url::ParseError> for ServiceWorkerError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: ServiceWorkerError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, ServiceWorkerError::InvalidUrl(_)));

        let err: ServiceWorkerError = serde_json::from_str::<u8>("{").unwrap_err().into();
        assert!(matches!(err, ServiceWorkerError::Config(_)));
    }

    #[test]
    fn test_is_network() {
        assert!(ServiceWorkerError::network("offline").is_network());
        assert!(!ServiceWorkerError::cache("full").is_network());
    }
}
