//! Push notification rendering and click routing.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::NotificationDefaults;
use crate::event::ExtendableEvent;
use crate::Result;

// ==================== Payload ====================

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NotificationAction {
    /// Action id that opens or focuses the application.
    pub const OPEN: &'static str = "open";
    /// Action id that only dismisses the notification.
    pub const CLOSE: &'static str = "close";

    /// Create an action without an icon.
    pub fn new(action: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            title: title.into(),
            icon: None,
        }
    }
}

/// Decoded push message. Every field is optional and untrusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub image: Option<String>,
    pub vibrate: Option<Vec<u32>>,
    pub tag: Option<String>,
    pub require_interaction: Option<bool>,
    pub actions: Option<Vec<NotificationAction>>,
    pub data: Option<Map<String, JsonValue>>,
}

impl PushPayload {
    /// Decode raw push data.
    ///
    /// Returns `None` for an empty message. Anything that is not a
    /// well-formed payload object degrades to a text-only payload.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }

        match serde_json::from_slice::<JsonValue>(raw) {
            Ok(value @ JsonValue::Object(_)) => match serde_json::from_value(value) {
                Ok(payload) => return Some(payload),
                Err(e) => debug!(error = %e, "Push payload has unexpected field types"),
            },
            Ok(JsonValue::String(text)) => return Some(Self::text(text)),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Push payload is not JSON"),
        }

        Some(Self::text(String::from_utf8_lossy(raw).into_owned()))
    }

    /// A payload carrying only a body.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }
}

/// Data attached to a rendered notification, used to route clicks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Where a click should lead.
    pub url: String,
    /// Creation time (ms since epoch).
    pub timestamp: u64,
    /// Remaining opaque fields from the payload.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub image: Option<String>,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

impl NotificationRecord {
    /// Merge a payload over the defaults. Explicit fields win; blank strings
    /// count as absent.
    pub fn from_payload(
        payload: PushPayload,
        defaults: &NotificationDefaults,
        origin: &Url,
    ) -> Self {
        let mut data = payload.data.unwrap_or_default();
        let url = match data.remove("url") {
            Some(JsonValue::String(url)) if !url.trim().is_empty() => url,
            _ => origin.to_string(),
        };
        let timestamp = data
            .remove("timestamp")
            .and_then(|t| t.as_u64())
            .unwrap_or_else(reddpwa_common::now_millis);

        Self {
            title: non_blank(payload.title).unwrap_or_else(|| defaults.title.clone()),
            body: non_blank(payload.body).unwrap_or_else(|| defaults.body.clone()),
            icon: non_blank(payload.icon).unwrap_or_else(|| defaults.icon.clone()),
            badge: non_blank(payload.badge).unwrap_or_else(|| defaults.badge.clone()),
            image: non_blank(payload.image),
            vibrate: payload.vibrate.unwrap_or_else(|| defaults.vibrate.clone()),
            tag: non_blank(payload.tag).unwrap_or_else(|| defaults.tag.clone()),
            require_interaction: payload
                .require_interaction
                .unwrap_or(defaults.require_interaction),
            actions: payload.actions.unwrap_or_else(|| defaults.actions.clone()),
            data: NotificationData {
                url,
                timestamp,
                extra: data,
            },
        }
    }

    /// Absolute click target, resolved against the application origin.
    pub fn target_url(&self, origin: &Url) -> Url {
        origin.join(&self.data.url).unwrap_or_else(|_| origin.clone())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ==================== Capabilities ====================

/// Notification permission granted by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Default,
    Granted,
    Denied,
}

/// Host notification renderer.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Current permission.
    async fn permission(&self) -> PermissionState;

    /// Render a notification; a record with the same tag replaces the old one.
    async fn show(&self, record: &NotificationRecord) -> Result<()>;

    /// Remove the notification with this tag.
    async fn close(&self, tag: &str) -> Result<()>;
}

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: String,
    pub url: Url,
    pub focused: bool,
    pub focusable: bool,
}

/// The host's set of open application windows.
#[async_trait]
pub trait WindowRegistry: Send + Sync {
    /// All open windows, including ones not yet controlled.
    async fn match_all(&self) -> Result<Vec<WindowClient>>;

    /// Focus a window.
    async fn focus(&self, id: &str) -> Result<WindowClient>;

    /// Open a new window.
    async fn open_window(&self, url: &Url) -> Result<WindowClient>;

    /// Make `controller` the controller of every open window; returns how many.
    async fn claim(&self, controller: &str) -> Result<usize>;
}

// ==================== Dispatcher ====================

/// Where a notification click led.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// The close action: nothing beyond dismissal.
    Dismissed,
    /// An existing window was focused.
    Focused(WindowClient),
    /// A new window was opened.
    Opened(WindowClient),
    /// Neither focusing nor opening worked.
    Failed,
}

/// Turns push messages into notifications and routes interaction.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    windows: Arc<dyn WindowRegistry>,
    defaults: NotificationDefaults,
    origin: Url,
}

impl NotificationDispatcher {
    /// Create a dispatcher.
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        windows: Arc<dyn WindowRegistry>,
        defaults: NotificationDefaults,
        origin: Url,
    ) -> Self {
        Self {
            sink,
            windows,
            defaults,
            origin,
        }
    }

    /// Handle a push event.
    ///
    /// The render runs on `event`, so the host keeps the worker alive until
    /// the notification is actually shown.
    pub async fn handle_push(
        &self,
        raw: Option<Bytes>,
        event: &mut ExtendableEvent,
    ) -> Option<NotificationRecord> {
        let Some(payload) = raw.as_deref().and_then(PushPayload::decode) else {
            debug!("Push without data, nothing to show");
            return None;
        };

        if self.sink.permission().await == PermissionState::Denied {
            warn!("Notification permission denied, dropping push");
            return None;
        }

        let record = NotificationRecord::from_payload(payload, &self.defaults, &self.origin);
        let sink = Arc::clone(&self.sink);
        let shown = record.clone();
        event.wait_until(async move {
            match sink.show(&shown).await {
                Ok(()) => info!(tag = %shown.tag, title = %shown.title, "Notification shown"),
                Err(e) => warn!(tag = %shown.tag, error = %e, "Failed to show notification"),
            }
        });

        Some(record)
    }

    /// Handle a click on the notification body or one of its actions.
    pub async fn handle_click(
        &self,
        record: &NotificationRecord,
        action: Option<&str>,
    ) -> ClickOutcome {
        if let Err(e) = self.sink.close(&record.tag).await {
            warn!(tag = %record.tag, error = %e, "Failed to close notification");
        }

        if action == Some(NotificationAction::CLOSE) {
            debug!(tag = %record.tag, "Notification dismissed via close action");
            return ClickOutcome::Dismissed;
        }

        let target = record.target_url(&self.origin);

        match self.windows.match_all().await {
            Ok(windows) => {
                let existing = windows
                    .into_iter()
                    .find(|w| w.focusable && same_document(&w.url, &target));
                if let Some(window) = existing {
                    match self.windows.focus(&window.id).await {
                        Ok(focused) => {
                            info!(window = %focused.id, url = %target, "Focused existing window");
                            return ClickOutcome::Focused(focused);
                        }
                        Err(e) => warn!(window = %window.id, error = %e, "Failed to focus window"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list windows"),
        }

        match self.windows.open_window(&target).await {
            Ok(opened) => {
                info!(window = %opened.id, url = %target, "Opened window");
                ClickOutcome::Opened(opened)
            }
            Err(e) => {
                warn!(url = %target, error = %e, "Failed to open window");
                ClickOutcome::Failed
            }
        }
    }

    /// Observe a dismissal without interaction.
    pub fn handle_close(&self, record: &NotificationRecord) {
        info!(tag = %record.tag, "Notification dismissed");
    }
}

fn same_document(a: &Url, b: &Url) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    a == b
}
