// src/host/mod.rs
//! Host runtime model
//!
//! The original runtime exposes mutable global APIs (network primitives,
//! console, history, DOM event sources). Here the host is an explicit object
//! passed into the SDK at construction: each API lives in a replaceable slot
//! that the interception layer can save, wrap, and restore, and DOM-level
//! events go through an id-keyed listener registry.
//!
//! - **Slots**: fetch (promise-style), send_xhr (callback-style),
//!   console_error, push_state / replace_state
//! - **Listeners**: per `HostEventKind`, dispatched synchronously
//! - **Capabilities**: a tap whose capability the host lacks is a no-op

pub mod element;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use element::Element;

/// Outbound request handed to the host's network primitives.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: Vec::new(),
            body: Some(body),
        }
    }
}

/// Response produced by the host's network primitives.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Network results carry a plain message on failure; the taps only observe.
pub type HttpResult = std::result::Result<HttpResponse, String>;

pub type FetchFuture = BoxFuture<'static, HttpResult>;
pub type FetchFn = dyn Fn(HttpRequest) -> FetchFuture + Send + Sync;
pub type XhrCallback = Box<dyn FnOnce(HttpResult) + Send>;
pub type XhrFn = dyn Fn(HttpRequest, XhrCallback) + Send + Sync;
pub type ConsoleFn = dyn Fn(&[String]) + Send + Sync;
pub type HistoryFn = dyn Fn(&str) + Send + Sync;
pub type ListenerFn = dyn Fn(&HostEvent) + Send + Sync;

/// Host features a tap may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Fetch,
    Xhr,
    Console,
    History,
    DomEvents,
}

/// DOM-level event kinds the host can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
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
}

/// DOM-level event payloads.
#[derive(Debug, Clone)]
pub enum HostEvent {
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
    Click {
        target: Arc<Element>,
        x: f64,
        y: f64,
    },
}

impl HostEvent {
    pub fn kind(&self) -> HostEventKind {
        match self {
            HostEvent::DomError { .. } => HostEventKind::DomError,
            HostEvent::UnhandledRejection { .. } => HostEventKind::UnhandledRejection,
            HostEvent::Load => HostEventKind::Load,
            HostEvent::BeforeUnload => HostEventKind::BeforeUnload,
            HostEvent::HashChange { .. } => HostEventKind::HashChange,
            HostEvent::PopState { .. } => HostEventKind::PopState,
            HostEvent::Online => HostEventKind::Online,
            HostEvent::Offline => HostEventKind::Offline,
            HostEvent::ReadyStateChange { .. } => HostEventKind::ReadyStateChange,
            HostEvent::Click { .. } => HostEventKind::Click,
        }
    }
}

/// Handle for removing an installed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle {
    kind: HostEventKind,
    id: u64,
}

/// The host runtime: replaceable API slots plus a listener registry.
pub struct Host {
    fetch: RwLock<Arc<FetchFn>>,
    send_xhr: RwLock<Arc<XhrFn>>,
    console_error: RwLock<Arc<ConsoleFn>>,
    push_state: RwLock<Arc<HistoryFn>>,
    replace_state: RwLock<Arc<HistoryFn>>,
    page_url: Arc<RwLock<String>>,
    online: AtomicBool,
    capabilities: RwLock<HashSet<Capability>>,
    listeners: RwLock<HashMap<HostEventKind, Vec<(u64, Arc<ListenerFn>)>>>,
    next_listener_id: AtomicU64,
}

impl Host {
    /// Create a host at `initial_url` with every capability granted.
    pub fn new(initial_url: impl Into<String>) -> Arc<Self> {
        let page_url = Arc::new(RwLock::new(initial_url.into()));

        let push_url = Arc::clone(&page_url);
        let push_state: Arc<HistoryFn> = Arc::new(move |url| {
            *push_url.write() = url.to_string();
        });
        let replace_url = Arc::clone(&page_url);
        let replace_state: Arc<HistoryFn> = Arc::new(move |url| {
            *replace_url.write() = url.to_string();
        });

        Arc::new(Self {
            fetch: RwLock::new(Arc::new(|_req| {
                Box::pin(async { Err("no network backend configured".to_string()) })
            })),
            send_xhr: RwLock::new(Arc::new(|_req, callback| {
                callback(Err("no network backend configured".to_string()));
            })),
            console_error: RwLock::new(Arc::new(|_args| {})),
            push_state: RwLock::new(push_state),
            replace_state: RwLock::new(replace_state),
            page_url,
            online: AtomicBool::new(true),
            capabilities: RwLock::new(
                [
                    Capability::Fetch,
                    Capability::Xhr,
                    Capability::Console,
                    Capability::History,
                    Capability::DomEvents,
                ]
                .into_iter()
                .collect(),
            ),
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        })
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.read().contains(&capability)
    }

    /// Remove a capability; installers for it become no-ops. Test hook.
    pub fn revoke_capability(&self, capability: Capability) {
        self.capabilities.write().remove(&capability);
    }

    // --- API slots ---

    pub fn fetch_slot(&self) -> Arc<FetchFn> {
        Arc::clone(&self.fetch.read())
    }

    pub fn set_fetch(&self, f: Arc<FetchFn>) {
        *self.fetch.write() = f;
    }

    pub fn xhr_slot(&self) -> Arc<XhrFn> {
        Arc::clone(&self.send_xhr.read())
    }

    pub fn set_xhr(&self, f: Arc<XhrFn>) {
        *self.send_xhr.write() = f;
    }

    pub fn console_error_slot(&self) -> Arc<ConsoleFn> {
        Arc::clone(&self.console_error.read())
    }

    pub fn set_console_error(&self, f: Arc<ConsoleFn>) {
        *self.console_error.write() = f;
    }

    pub fn push_state_slot(&self) -> Arc<HistoryFn> {
        Arc::clone(&self.push_state.read())
    }

    pub fn set_push_state(&self, f: Arc<HistoryFn>) {
        *self.push_state.write() = f;
    }

    pub fn replace_state_slot(&self) -> Arc<HistoryFn> {
        Arc::clone(&self.replace_state.read())
    }

    pub fn set_replace_state(&self, f: Arc<HistoryFn>) {
        *self.replace_state.write() = f;
    }

    // --- API calls, routed through whatever currently occupies the slot ---

    pub fn fetch(&self, request: HttpRequest) -> FetchFuture {
        (self.fetch_slot())(request)
    }

    pub fn send_xhr(&self, request: HttpRequest, callback: XhrCallback) {
        (self.xhr_slot())(request, callback)
    }

    pub fn log_console_error(&self, args: &[String]) {
        (self.console_error_slot())(args)
    }

    pub fn push_state(&self, url: &str) {
        (self.push_state_slot())(url)
    }

    pub fn replace_state(&self, url: &str) {
        (self.replace_state_slot())(url)
    }

    // --- Page state ---

    pub fn page_url(&self) -> String {
        self.page_url.read().clone()
    }

    /// Shared handle taps capture instead of the whole host, so installed
    /// wrappers never hold the host alive through its own slots.
    pub fn page_url_handle(&self) -> Arc<RwLock<String>> {
        Arc::clone(&self.page_url)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flip the connectivity flag and fire the matching listeners.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            self.dispatch(if online {
                &HostEvent::Online
            } else {
                &HostEvent::Offline
            });
        }
    }

    // --- Listener registry ---

    pub fn add_listener(
        &self,
        kind: HostEventKind,
        listener: Arc<ListenerFn>,
    ) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, listener));
        ListenerHandle { kind, id }
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        if let Some(list) = self.listeners.write().get_mut(&handle.kind) {
            list.retain(|(id, _)| *id != handle.id);
        }
    }

    pub fn listener_count(&self, kind: HostEventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Fire every listener registered for the event's kind, synchronously.
    pub fn dispatch(&self, event: &HostEvent) {
        let listeners: Vec<Arc<ListenerFn>> = {
            let map = self.listeners.read();
            match map.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };
        for listener in listeners {
            listener(event);
        }
    }

    /// Convenience for dispatching a click at the given element and position.
    pub fn dispatch_click(&self, target: Arc<Element>, x: f64, y: f64) {
        self.dispatch(&HostEvent::Click { target, x, y });
    }
}
