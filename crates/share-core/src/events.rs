//! Notifications for the UI layer.
//!
//! Provides `ShareEvent` (progress, messages, refresh hints, session
//! states) and `EventBus` for fire-and-forget subscriptions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::session::SessionState;

/// Severity tag attached to user-visible messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ShareEvent {
    /// Toggle the progress indicator.
    Loading { active: bool },
    /// Terminal or per-edit message for the user.
    Message {
        severity: Severity,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// A mutating operation touched this directory; listings are stale.
    RefreshListing { directory: String },
    /// A session moved to a new state.
    SessionState {
        identity: String,
        state: SessionState,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(ShareEvent) + Send + Sync>;

/// Event bus for publishing share events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(ShareEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // emit never holds the lock while callbacks run, so waiting is safe.
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: ShareEvent) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn message(&self, severity: Severity, text: impl Into<String>) {
        self.emit(ShareEvent::Message {
            severity,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn loading(&self, active: bool) {
        self.emit(ShareEvent::Loading { active });
    }

    pub fn refresh(&self, directory: &str) {
        self.emit(ShareEvent::RefreshListing {
            directory: directory.to_string(),
        });
    }
}

/// Collects every event; handy for tests and the CLI.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<std::sync::Mutex<Vec<ShareEvent>>>,
}

impl EventLog {
    /// Subscribe a new log to `bus`.
    pub fn attach(bus: &Arc<EventBus>) -> (Self, Subscription) {
        let log = Self::default();
        let sink = log.clone();
        let sub = bus.subscribe(move |event| {
            sink.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event);
        });
        (log, sub)
    }

    pub fn events(&self) -> Vec<ShareEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Messages with the given severity, in order.
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ShareEvent::Message {
                    severity: s, text, ..
                } if s == severity => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn refreshes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ShareEvent::RefreshListing { directory } => Some(directory),
                _ => None,
            })
            .collect()
    }
}
