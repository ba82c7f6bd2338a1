//! Worker events and their lifetimes.
//!
//! The host delivers one [`WorkerEvent`] at a time. Handlers may start
//! background sub-operations (a cache write, a notification render); each is
//! registered on the event's [`ExtendableEvent`], and the host must await
//! [`ExtendableEvent::settle`] before it may tear the worker down. Dropping an
//! unsettled event aborts whatever is still running, exactly as a host
//! terminating the worker would.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tokio::task::JoinSet;
use tracing::{trace, warn};

use crate::fetch::{FetchRequest, FetchResponse};
use crate::notification::{ClickOutcome, NotificationRecord};
use crate::ServiceWorkerError;

// ==================== Events ====================

/// Event-kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    NotificationClose,
    Message,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
            EventKind::NotificationClose => "notificationclose",
            EventKind::Message => "message",
        };
        f.write_str(name)
    }
}

/// An event delivered to the worker by its host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Precache this generation.
    Install,
    /// Cut over to this generation.
    Activate,
    /// An outgoing request from a controlled window.
    Fetch(FetchRequest),
    /// An inbound push message; `None` when it carries no data.
    Push(Option<Bytes>),
    /// The user clicked a notification or one of its actions.
    NotificationClick {
        record: NotificationRecord,
        action: Option<String>,
    },
    /// The user dismissed a notification without interacting.
    NotificationClose { record: NotificationRecord },
    /// A control-channel message from the foreground application.
    Message(JsonValue),
}

impl WorkerEvent {
    /// The tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick { .. } => EventKind::NotificationClick,
            WorkerEvent::NotificationClose { .. } => EventKind::NotificationClose,
            WorkerEvent::Message(_) => EventKind::Message,
        }
    }
}

// ==================== Lifetime ====================

/// Outcome of settling an event's background work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleReport {
    /// Sub-operations that ran to completion.
    pub completed: usize,
    /// Sub-operations that panicked or were cancelled.
    pub failed: usize,
}

/// Lifetime guard of one event.
#[derive(Debug)]
pub struct ExtendableEvent {
    kind: EventKind,
    pending: JoinSet<()>,
}

impl ExtendableEvent {
    /// Create the guard for an event.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            pending: JoinSet::new(),
        }
    }

    /// Event kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Keep the event alive until `work` finishes.
    ///
    /// `work` starts running immediately on the current runtime.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.spawn(work);
        trace!(kind = %self.kind, pending = self.pending.len(), "Extended event lifetime");
    }

    /// Number of sub-operations not yet settled.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Await every registered sub-operation.
    pub async fn settle(mut self) -> SettleReport {
        let mut report = SettleReport::default();
        while let Some(result) = self.pending.join_next().await {
            match result {
                Ok(()) => report.completed += 1,
                Err(e) => {
                    warn!(kind = %self.kind, error = %e, "Event sub-operation did not finish");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

// ==================== Completion ====================

/// What a handler did with an event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// Precache committed; the worker is waiting.
    Installed,
    /// Stale generations removed and windows claimed.
    Activated { deleted: Vec<String> },
    /// Install or activate failed; the previous generation keeps serving.
    LifecycleFailed(ServiceWorkerError),
    /// The worker answered the request.
    Responded(FetchResponse),
    /// The worker declined the request; the host performs it unmodified.
    PassedThrough,
    /// A notification is being rendered.
    NotificationShown(NotificationRecord),
    /// No notification: empty push or permission denied.
    NotificationSkipped,
    /// Result of routing a notification click.
    Click(ClickOutcome),
    /// Dismissal observed.
    Closed,
    /// The control channel asked for immediate activation.
    SkipWaiting,
    /// Unrecognized control message.
    Ignored,
}

/// Result of dispatching one event.
#[derive(Debug)]
pub struct EventCompletion {
    pub kind: EventKind,
    pub outcome: EventOutcome,
    pub lifetime: ExtendableEvent,
}

impl EventCompletion {
    /// The response for a fetch event, if the worker produced one.
    pub fn response(&self) -> Option<&FetchResponse> {
        match &self.outcome {
            EventOutcome::Responded(response) => Some(response),
            _ => None,
        }
    }

    /// Settle background work and hand back the outcome.
    pub async fn finish(self) -> (EventOutcome, SettleReport) {
        let report = self.lifetime.settle().await;
        (self.outcome, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_settle_waits_for_all_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut event = ExtendableEvent::new(EventKind::Fetch);

        for delay in [30u64, 10, 20] {
            let counter = Arc::clone(&counter);
            event.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(event.pending(), 3);

        let report = event.settle().await;
        assert_eq!(report, SettleReport { completed: 3, failed: 0 });
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_settle_reports_panics() {
        let mut event = ExtendableEvent::new(EventKind::Push);
        event.wait_until(async { panic!("renderer crashed") });
        event.wait_until(async {});

        let report = event.settle().await;
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_drop_aborts_unsettled_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut event = ExtendableEvent::new(EventKind::Fetch);
            let counter = Arc::clone(&counter);
            event.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_event_kind_tags() {
        assert_eq!(WorkerEvent::Install.kind(), EventKind::Install);
        assert_eq!(WorkerEvent::Push(None).kind(), EventKind::Push);
        assert_eq!(
            WorkerEvent::Message(serde_json::json!({})).kind().to_string(),
            "message"
        );
    }
}
