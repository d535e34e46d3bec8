// src/bus/mod.rs
//! Event dispatch bus
//!
//! In-process synchronous pub/sub keyed by event kind. Taps publish canonical
//! events here; plugins and the SDK's own wiring subscribe. Fan-out happens on
//! the emitter's call stack, in subscription order, and a failing handler is
//! logged without interrupting the remaining handlers or the emitter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::host::element::Element;
use crate::interception::click::ClickRecord;
use crate::utils::Result;

/// Event-type tag used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RequestStart,
    RequestEnd,
    ConsoleError,
    RouteChange,
    DomError,
    UnhandledRejection,
    Load,
    BeforeUnload,
    HashChange,
    PopState,
    Online,
    Offline,
    ReadyStateChange,
    Click,
    ClickTracked,
}

/// How a route transition was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    Push,
    Replace,
}

/// A raw (un-enriched) click observation.
#[derive(Debug, Clone)]
pub struct RawClick {
    pub target: Arc<Element>,
    pub x: f64,
    pub y: f64,
    pub page_url: String,
    pub timestamp_ms: u64,
}

/// Canonical event emitted by the interception layer.
#[derive(Debug, Clone)]
pub enum TapEvent {
    RequestStart {
        request_id: String,
        url: String,
        method: String,
        timestamp_ms: u64,
    },
    RequestEnd {
        request_id: String,
        url: String,
        method: String,
        status: Option<u16>,
        error: Option<String>,
        duration_ms: u64,
        timestamp_ms: u64,
    },
    ConsoleError {
        args: Vec<String>,
        timestamp_ms: u64,
    },
    RouteChange {
        from: String,
        to: String,
        mode: NavigationMode,
        timestamp_ms: u64,
    },
    DomError {
        message: String,
        source: Option<String>,
        line: Option<u32>,
        column: Option<u32>,
    },
    UnhandledRejection {
        reason: String,
    },
    Load,
    BeforeUnload,
    HashChange {
        from: String,
        to: String,
    },
    PopState {
        url: String,
    },
    Online,
    Offline,
    ReadyStateChange {
        state: String,
    },
    Click(RawClick),
    ClickTracked(ClickRecord),
}

impl TapEvent {
    /// The subscription key this event is dispatched under.
    pub fn kind(&self) -> EventKind {
        match self {
            TapEvent::RequestStart { .. } => EventKind::RequestStart,
            TapEvent::RequestEnd { .. } => EventKind::RequestEnd,
            TapEvent::ConsoleError { .. } => EventKind::ConsoleError,
            TapEvent::RouteChange { .. } => EventKind::RouteChange,
            TapEvent::DomError { .. } => EventKind::DomError,
            TapEvent::UnhandledRejection { .. } => EventKind::UnhandledRejection,
            TapEvent::Load => EventKind::Load,
            TapEvent::BeforeUnload => EventKind::BeforeUnload,
            TapEvent::HashChange { .. } => EventKind::HashChange,
            TapEvent::PopState { .. } => EventKind::PopState,
            TapEvent::Online => EventKind::Online,
            TapEvent::Offline => EventKind::Offline,
            TapEvent::ReadyStateChange { .. } => EventKind::ReadyStateChange,
            TapEvent::Click(_) => EventKind::Click,
            TapEvent::ClickTracked(_) => EventKind::ClickTracked,
        }
    }
}

/// Handler callback signature.
pub type HandlerFn = dyn Fn(&TapEvent) -> Result<()> + Send + Sync;

/// Token identifying one subscription; used for unsubscribe and replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct Entry {
    id: u64,
    callback: Arc<HandlerFn>,
}

/// Synchronous pub/sub bus keyed by `EventKind`.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a handler to the list for `kind`; later subscribers fire later.
    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&TapEvent) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().entry(kind).or_default().push(Entry {
            id,
            callback: Arc::new(callback),
        });
        Subscription { id, kind }
    }

    /// Remove the handler identified by `sub`. Unknown tokens are ignored.
    pub fn unsubscribe(&self, sub: &Subscription) {
        if let Some(list) = self.handlers.write().get_mut(&sub.kind) {
            list.retain(|entry| entry.id != sub.id);
        }
    }

    /// Swap the callback for `sub`, preserving its position in the fan-out
    /// order. Returns false when the subscription is no longer registered.
    pub fn replace(
        &self,
        sub: &Subscription,
        callback: impl Fn(&TapEvent) -> Result<()> + Send + Sync + 'static,
    ) -> bool {
        if let Some(list) = self.handlers.write().get_mut(&sub.kind) {
            if let Some(entry) = list.iter_mut().find(|entry| entry.id == sub.id) {
                entry.callback = Arc::new(callback);
                return true;
            }
        }
        false
    }

    /// Invoke every handler registered for the event's kind, in subscription
    /// order, on the caller's stack. Handler failures are logged and do not
    /// stop fan-out.
    pub fn emit(&self, event: &TapEvent) {
        let callbacks: Vec<Arc<HandlerFn>> = {
            let handlers = self.handlers.read();
            match handlers.get(&event.kind()) {
                Some(list) => list.iter().map(|entry| Arc::clone(&entry.callback)).collect(),
                None => return,
            }
        };

        for callback in callbacks {
            if let Err(e) = callback(event) {
                warn!(kind = ?event.kind(), error = %e, "event handler failed");
            }
        }
    }

    /// Number of handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SdkError;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe(EventKind::Load, move |_| {
                order.lock().push(label);
                Ok(())
            });
        }

        bus.emit(&TapEvent::Load);
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_fanout() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.subscribe(EventKind::Load, |_| {
            Err(SdkError::Handler("boom".to_string()))
        });
        let flag = Arc::clone(&reached);
        bus.subscribe(EventKind::Load, move |_| {
            *flag.lock() = true;
            Ok(())
        });

        bus.emit(&TapEvent::Load);
        assert!(*reached.lock());
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&count);
        let sub = bus.subscribe(EventKind::Online, move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        bus.emit(&TapEvent::Online);
        bus.unsubscribe(&sub);
        bus.emit(&TapEvent::Online);

        assert_eq!(*count.lock(), 1);
        assert_eq!(bus.handler_count(EventKind::Online), 0);
    }

    #[test]
    fn test_replace_preserves_position() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        let first = bus.subscribe(EventKind::Load, move |_| {
            o1.lock().push("original");
            Ok(())
        });
        let o2 = Arc::clone(&order);
        bus.subscribe(EventKind::Load, move |_| {
            o2.lock().push("second");
            Ok(())
        });

        let o3 = Arc::clone(&order);
        assert!(bus.replace(&first, move |_| {
            o3.lock().push("replaced");
            Ok(())
        }));

        bus.emit(&TapEvent::Load);
        assert_eq!(*order.lock(), vec!["replaced", "second"]);
    }

    #[test]
    fn test_replace_after_unsubscribe_fails() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::Load, |_| Ok(()));
        bus.unsubscribe(&sub);
        assert!(!bus.replace(&sub, |_| Ok(())));
    }

    #[test]
    fn test_emit_without_handlers_is_noop() {
        let bus = EventBus::new();
        bus.emit(&TapEvent::Offline);
    }
}
