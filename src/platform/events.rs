//! Asynchronous platform events and the source that delivers them.

#![allow(missing_docs)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::subscribers::SubscriberSet;

/// Instrumentation event fired by the host platform.
///
/// Timing fields are milliseconds relative to navigation start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PlatformEvent {
    /// Paint timing entry (`first-paint`, `first-contentful-paint`).
    Paint { name: String, start_time: f64 },
    /// Largest-contentful-paint candidate; later entries supersede earlier ones.
    LargestContentfulPaint { start_time: f64 },
    FirstInput {
        start_time: f64,
        processing_start: f64,
    },
    LayoutShift {
        value: f64,
        #[serde(default)]
        had_recent_input: bool,
    },
    LongTask { duration: f64 },
    /// The value behind [`Platform::connection`](super::pal::Platform::connection) changed.
    ConnectionChange,
    UncaughtError {
        message: String,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        column: Option<u32>,
        #[serde(default)]
        stack: Option<String>,
    },
    UnhandledRejection {
        reason: String,
        #[serde(default)]
        stack: Option<String>,
    },
    Click { target: String },
    Scroll { x: f64, y: f64 },
    KeyDown { key: String },
    Navigation { url: String },
}

impl PlatformEvent {
    /// Stable kebab-case name, matching the serialized tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Paint { .. } => "paint",
            Self::LargestContentfulPaint { .. } => "largest-contentful-paint",
            Self::FirstInput { .. } => "first-input",
            Self::LayoutShift { .. } => "layout-shift",
            Self::LongTask { .. } => "long-task",
            Self::ConnectionChange => "connection-change",
            Self::UncaughtError { .. } => "uncaught-error",
            Self::UnhandledRejection { .. } => "unhandled-rejection",
            Self::Click { .. } => "click",
            Self::Scroll { .. } => "scroll",
            Self::KeyDown { .. } => "key-down",
            Self::Navigation { .. } => "navigation",
        }
    }
}

/// Opaque handle for a listener attached to an [`EventSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener callback type.
pub type Listener = Arc<dyn Fn(&PlatformEvent) + Send + Sync>;

/// Capability for attaching to platform events.
pub trait EventSource: Send + Sync {
    fn subscribe(&self, listener: Listener) -> ListenerId;
    /// Returns whether the listener was still attached.
    fn unsubscribe(&self, id: ListenerId) -> bool;
    fn listener_count(&self) -> usize;
}

/// In-process event fan-out used by both native and synthetic platforms.
///
/// The host (or a test) calls [`EventBus::emit`]; listeners run synchronously
/// on the emitting thread with panic isolation.
pub struct EventBus {
    listeners: SubscriberSet<PlatformEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: SubscriberSet::new("platform-events"),
        }
    }

    /// Deliver `event` to every attached listener.
    pub fn emit(&self, event: &PlatformEvent) -> usize {
        tracing::trace!(kind = event.kind(), "platform event");
        self.listeners.notify(event)
    }
}

impl EventSource for EventBus {
    fn subscribe(&self, listener: Listener) -> ListenerId {
        ListenerId(self.listeners.insert(listener))
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id.0)
    }

    fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.subscribe(Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(bus.listener_count(), 1);
        bus.emit(&PlatformEvent::ConnectionChange);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&PlatformEvent::ConnectionChange);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn events_deserialize_from_tagged_json() {
        let event: PlatformEvent =
            serde_json::from_str(r#"{"type":"layout-shift","value":0.05}"#).expect("parse");
        assert_eq!(
            event,
            PlatformEvent::LayoutShift {
                value: 0.05,
                had_recent_input: false
            }
        );
        let event: PlatformEvent =
            serde_json::from_str(r#"{"type":"uncaught-error","message":"boom"}"#).expect("parse");
        assert_eq!(event.kind(), "uncaught-error");
    }
}
