//! Headless notification and window capabilities.
//!
//! There is no desktop here: notifications are written to the log and the
//! window list is a plain in-memory vector.

use std::sync::Mutex;

use async_trait::async_trait;
use reddpwa_sw::{
    NotificationRecord, NotificationSink, PermissionState, Result, ServiceWorkerError,
    WindowClient, WindowRegistry,
};
use tracing::info;
use url::Url;

/// Logs every notification instead of rendering it.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn show(&self, record: &NotificationRecord) -> Result<()> {
        info!(tag = %record.tag, title = %record.title, body = %record.body, url = %record.data.url, "Notification");
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<()> {
        info!(tag, "Notification closed");
        Ok(())
    }
}

/// Window list that only exists in this process.
#[derive(Debug, Default)]
pub struct HeadlessWindows {
    windows: Mutex<Vec<WindowClient>>,
}

impl HeadlessWindows {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<WindowClient>>> {
        self.windows
            .lock()
            .map_err(|_| ServiceWorkerError::Client("window list poisoned".into()))
    }
}

#[async_trait]
impl WindowRegistry for HeadlessWindows {
    async fn match_all(&self) -> Result<Vec<WindowClient>> {
        Ok(self.lock()?.clone())
    }

    async fn focus(&self, id: &str) -> Result<WindowClient> {
        let mut windows = self.lock()?;
        for window in windows.iter_mut() {
            window.focused = window.id == id;
        }
        windows
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))
    }

    async fn open_window(&self, url: &Url) -> Result<WindowClient> {
        let mut windows = self.lock()?;
        for window in windows.iter_mut() {
            window.focused = false;
        }
        let window = WindowClient {
            id: format!("window-{}", windows.len() + 1),
            url: url.clone(),
            focused: true,
            focusable: true,
        };
        info!(window = %window.id, url = %url, "Opened window");
        windows.push(window.clone());
        Ok(window)
    }

    async fn claim(&self, _controller: &str) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}
