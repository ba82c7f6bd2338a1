//! In-memory fakes of the host capabilities.
//!
//! Configure expected behaviour via the setter methods, inject the fakes into
//! a worker, then inspect what the worker did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use url::Url;

use crate::fetch::{FetchRequest, FetchResponse};
use crate::intercept::Network;
use crate::notification::{
    NotificationRecord, NotificationSink, PermissionState, WindowClient, WindowRegistry,
};
use crate::{Result, ServiceWorkerError};

// ==================== Network ====================

enum Route {
    Respond(FetchResponse),
    Fail,
}

/// Scripted network. Unknown URLs answer `404`.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl FakeNetwork {
    /// Create an online network with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`.
    pub fn respond(&self, url: Url, response: FetchResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.into(), Route::Respond(response));
    }

    /// Make requests for `url` fail as if the host were unreachable.
    pub fn fail(&self, url: Url) {
        self.routes.lock().unwrap().insert(url.into(), Route::Fail);
    }

    /// Toggle total connectivity loss.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of requests attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::network("offline"));
        }

        let mut url = request.url.clone();
        url.set_fragment(None);
        match self.routes.lock().unwrap().get(url.as_str()) {
            Some(Route::Respond(response)) => Ok(response.clone()),
            Some(Route::Fail) => Err(ServiceWorkerError::network(format!(
                "connection refused: {url}"
            ))),
            None => Ok(FetchResponse::new(
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                "Not Found",
            )),
        }
    }
}

// ==================== Notifications ====================

/// Notification sink that records what it was asked to do.
pub struct RecordingNotificationSink {
    permission: Mutex<PermissionState>,
    fail_show: AtomicBool,
    shown: Mutex<Vec<NotificationRecord>>,
    closed: Mutex<Vec<String>>,
}

impl Default for RecordingNotificationSink {
    fn default() -> Self {
        Self {
            permission: Mutex::new(PermissionState::Granted),
            fail_show: AtomicBool::new(false),
            shown: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingNotificationSink {
    /// Create a sink with permission granted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the reported permission.
    pub fn set_permission(&self, permission: PermissionState) {
        *self.permission.lock().unwrap() = permission;
    }

    /// Make every `show` fail.
    pub fn fail_show(&self, fail: bool) {
        self.fail_show.store(fail, Ordering::SeqCst);
    }

    /// Notifications shown so far.
    pub fn shown(&self) -> Vec<NotificationRecord> {
        self.shown.lock().unwrap().clone()
    }

    /// Tags closed so far.
    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn show(&self, record: &NotificationRecord) -> Result<()> {
        if self.fail_show.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::Notification("renderer unavailable".into()));
        }
        let mut shown = self.shown.lock().unwrap();
        shown.retain(|r| r.tag != record.tag);
        shown.push(record.clone());
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<()> {
        self.closed.lock().unwrap().push(tag.to_string());
        self.shown.lock().unwrap().retain(|r| r.tag != tag);
        Ok(())
    }
}

// ==================== Windows ====================

/// Window list held in memory.
#[derive(Default)]
pub struct FakeWindowRegistry {
    windows: Mutex<Vec<WindowClient>>,
    next_id: AtomicUsize,
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    controller: Mutex<Option<String>>,
}

impl FakeWindowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open, focusable window and return its id.
    pub fn add_window(&self, url: &str) -> String {
        let id = format!("window-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let url = Url::parse(url).unwrap();
        self.windows.lock().unwrap().push(WindowClient {
            id: id.clone(),
            url,
            focused: false,
            focusable: true,
        });
        id
    }

    /// Close a window.
    pub fn remove_window(&self, id: &str) {
        self.windows.lock().unwrap().retain(|w| w.id != id);
    }

    /// Change whether a window can take focus.
    pub fn set_focusable(&self, id: &str, focusable: bool) {
        for window in self.windows.lock().unwrap().iter_mut() {
            if window.id == id {
                window.focusable = focusable;
            }
        }
    }

    /// Ids of windows focused so far.
    pub fn focused(&self) -> Vec<String> {
        self.focused.lock().unwrap().clone()
    }

    /// URLs of windows opened so far.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    /// Worker that last claimed the windows.
    pub fn controller(&self) -> Option<String> {
        self.controller.lock().unwrap().clone()
    }
}

#[async_trait]
impl WindowRegistry for FakeWindowRegistry {
    async fn match_all(&self) -> Result<Vec<WindowClient>> {
        Ok(self.windows.lock().unwrap().clone())
    }

    async fn focus(&self, id: &str) -> Result<WindowClient> {
        let mut windows = self.windows.lock().unwrap();
        let mut result = None;
        for window in windows.iter_mut() {
            window.focused = window.id == id;
            if window.focused {
                result = Some(window.clone());
            }
        }
        let window = result.ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;
        if !window.focusable {
            return Err(ServiceWorkerError::Client(format!("{id} cannot take focus")));
        }
        self.focused.lock().unwrap().push(id.to_string());
        Ok(window)
    }

    async fn open_window(&self, url: &Url) -> Result<WindowClient> {
        let id = format!("window-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let window = WindowClient {
            id,
            url: url.clone(),
            focused: true,
            focusable: true,
        };
        let mut windows = self.windows.lock().unwrap();
        for other in windows.iter_mut() {
            other.focused = false;
        }
        windows.push(window.clone());
        self.opened.lock().unwrap().push(url.to_string());
        Ok(window)
    }

    async fn claim(&self, controller: &str) -> Result<usize> {
        *self.controller.lock().unwrap() = Some(controller.to_string());
        Ok(self.windows.lock().unwrap().len())
    }
}
