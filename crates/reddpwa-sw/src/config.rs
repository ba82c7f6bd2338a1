//! Worker configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::notification::NotificationAction;
use crate::{Result, ServiceWorkerError};

/// Worker configuration, fixed for the lifetime of one generation.
///
/// Only `origin` is required; every other field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Application origin (also the fallback notification target).
    pub origin: Url,

    /// Cache name prefix.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Version token; bump it to roll out a new generation.
    #[serde(default = "default_version")]
    pub version: String,

    /// Root-relative paths that must be cached before install succeeds.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Root-relative path of the application shell document.
    #[serde(default = "default_app_shell")]
    pub app_shell: String,

    /// Activate right after install instead of waiting for windows to close.
    #[serde(default = "default_skip_waiting")]
    pub skip_waiting_on_install: bool,

    /// Response synthesized when nothing else is available.
    #[serde(default)]
    pub offline_response: OfflineResponse,

    /// Notification defaults.
    #[serde(default)]
    pub notifications: NotificationDefaults,
}

fn default_cache_prefix() -> String {
    "reddpwa-cache".to_string()
}

fn default_version() -> String {
    "5".to_string()
}

fn default_precache() -> Vec<String> {
    vec![
        "/".to_string(),
        "/static/js/bundle.js".to_string(),
        "/static/css/main.css".to_string(),
        "/manifest.json".to_string(),
        "/logo192.png".to_string(),
    ]
}

fn default_app_shell() -> String {
    "/".to_string()
}

fn default_skip_waiting() -> bool {
    true
}

impl WorkerConfig {
    /// Create a configuration for an origin and version with default assets.
    pub fn new(origin: Url, version: impl Into<String>) -> Self {
        Self {
            origin,
            cache_prefix: default_cache_prefix(),
            version: version.into(),
            precache: default_precache(),
            app_shell: default_app_shell(),
            skip_waiting_on_install: default_skip_waiting(),
            offline_response: OfflineResponse::default(),
            notifications: NotificationDefaults::default(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ServiceWorkerError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::Config("version must not be empty".into()));
        }
        if self.cache_prefix.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_prefix must not be empty".into(),
            ));
        }
        // `//host/path` is scheme-relative and would leave the origin.
        if let Some(bad) = self
            .precache
            .iter()
            .find(|p| !p.starts_with('/') || p.starts_with("//"))
        {
            return Err(ServiceWorkerError::Config(format!(
                "precache path `{bad}` is not root-relative"
            )));
        }
        if !self.precache.contains(&self.app_shell) {
            return Err(ServiceWorkerError::Config(format!(
                "app shell `{}` is missing from the precache manifest",
                self.app_shell
            )));
        }
        if !(500..=599).contains(&self.offline_response.status) {
            return Err(ServiceWorkerError::Config(format!(
                "offline status {} is not a server error",
                self.offline_response.status
            )));
        }
        Ok(())
    }

    /// Name of this generation's cache instance.
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.cache_prefix, self.version)
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Absolute URLs of the precache manifest, in order.
    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    /// Absolute URL of the application shell.
    pub fn app_shell_url(&self) -> Result<Url> {
        self.resolve(&self.app_shell)
    }
}

/// The synthesized "unavailable" response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineResponse {
    pub status: u16,
    pub body: String,
}

impl Default for OfflineResponse {
    fn default() -> Self {
        Self {
            status: 503,
            body: "Service Unavailable: you are offline and this resource is not cached."
                .to_string(),
        }
    }
}

/// Defaults merged under every push payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "REDDPWA".to_string(),
            body: "You have a new notification".to_string(),
            icon: "/logo192.png".to_string(),
            badge: "/logo192.png".to_string(),
            vibrate: vec![200, 100, 200],
            tag: "reddpwa-notification".to_string(),
            require_interaction: true,
            actions: vec![
                NotificationAction::new(NotificationAction::OPEN, "Open app"),
                NotificationAction::new(NotificationAction::CLOSE, "Close"),
            ],
        }
    }
}
