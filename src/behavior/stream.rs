// src/behavior/stream.rs
//! Bounded, age-limited behavior event stream
//!
//! A ring buffer of immutable `BehaviorEvent`s. Inserts run the acceptance
//! filter, stamp id/timestamp, and evict oldest-first past `max_size`. A
//! periodic sweeper drops events older than `max_age_ms`; snapshots and stats
//! are pure reads.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BehaviorEvent, NewBehaviorEvent};
use crate::utils::{ids, Clock};

/// Acceptance predicate evaluated at insertion; rejected events are never
/// stored and never counted.
#[derive(Clone)]
pub struct EventFilter(pub Arc<dyn Fn(&BehaviorEvent) -> bool + Send + Sync>);

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventFilter(..)")
    }
}

/// Per-stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Ring-buffer capacity; oldest events are evicted past this
    pub max_size: usize,

    /// Events older than this are swept; <= 0 disables sweeping
    pub max_age_ms: i64,

    /// Sweep timer period (milliseconds)
    pub sweep_interval_ms: u64,

    /// Verbose stream diagnostics
    pub debug: bool,

    /// Optional acceptance filter
    pub filter: Option<EventFilter>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_age_ms: 5 * 60 * 1000,
            sweep_interval_ms: 10_000,
            debug: false,
            filter: None,
        }
    }
}

/// Snapshot query: inclusive time bounds, type sets, trailing count cap.
#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub include_types: Option<Vec<String>>,
    pub exclude_types: Vec<String>,
    pub max_count: Option<usize>,
}

/// Stream statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Total events ever accepted; never decremented
    pub total_events: u64,

    /// Events currently in the live buffer
    pub current_events: usize,

    /// Earliest timestamp in the live buffer
    pub earliest_ms: Option<u64>,

    /// Latest timestamp in the live buffer
    pub latest_ms: Option<u64>,

    /// Per-type counts over the live buffer
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Default)]
struct StreamInner {
    events: VecDeque<BehaviorEvent>,
    total_events: u64,
}

/// One bounded, age-limited behavior stream.
pub struct BehaviorStream {
    name: String,
    config: StreamConfig,
    clock: Arc<dyn Clock>,
    page_url: Arc<RwLock<String>>,
    inner: Mutex<StreamInner>,
    sweeper: Mutex<Option<CancellationToken>>,
    destroyed: AtomicBool,
}

impl BehaviorStream {
    /// Create a stream and start its sweep timer when age limiting is on and
    /// a tokio runtime is available.
    pub fn new(
        name: impl Into<String>,
        config: StreamConfig,
        clock: Arc<dyn Clock>,
        page_url: Arc<RwLock<String>>,
    ) -> Arc<Self> {
        let stream = Arc::new(Self {
            name: name.into(),
            config,
            clock,
            page_url,
            inner: Mutex::new(StreamInner::default()),
            sweeper: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });
        stream.spawn_sweeper();
        stream
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Accept one event. Returns false when the stream is destroyed or the
    /// acceptance filter rejects it; rejected events touch no counters.
    pub fn add_event(&self, partial: NewBehaviorEvent) -> bool {
        if self.is_destroyed() {
            return false;
        }

        let event = BehaviorEvent {
            id: ids::new_id(),
            event_type: partial.event_type,
            timestamp_ms: self.clock.now_ms(),
            page_url: partial
                .page_url
                .unwrap_or_else(|| self.page_url.read().clone()),
            context: partial.context,
            custom_data: partial.custom_data,
        };

        if let Some(EventFilter(filter)) = &self.config.filter {
            if !filter(&event) {
                if self.config.debug {
                    debug!(stream = %self.name, event_type = %event.event_type, "event rejected by filter");
                }
                return false;
            }
        }

        let mut inner = self.inner.lock();
        inner.events.push_back(event);
        inner.total_events += 1;
        while inner.events.len() > self.config.max_size {
            inner.events.pop_front();
        }
        true
    }

    /// Sugar for custom events: sets `custom_data` and the current page URL.
    pub fn add_custom_event(
        &self,
        event_type: impl Into<String>,
        data: serde_json::Value,
        context: Option<super::EventContext>,
    ) -> bool {
        self.add_event(NewBehaviorEvent {
            event_type: event_type.into(),
            context: context.unwrap_or_else(super::EventContext::custom),
            custom_data: Some(data),
            page_url: Some(self.page_url.read().clone()),
        })
    }

    /// Pure read over the live buffer.
    pub fn snapshot(&self, query: &SnapshotQuery) -> Vec<BehaviorEvent> {
        let inner = self.inner.lock();
        let mut selected: Vec<BehaviorEvent> = inner
            .events
            .iter()
            .filter(|e| {
                query.start_ms.map_or(true, |start| e.timestamp_ms >= start)
                    && query.end_ms.map_or(true, |end| e.timestamp_ms <= end)
                    && query
                        .include_types
                        .as_ref()
                        .map_or(true, |types| types.contains(&e.event_type))
                    && !query.exclude_types.contains(&e.event_type)
            })
            .cloned()
            .collect();

        if let Some(max) = query.max_count {
            if selected.len() > max {
                selected.drain(..selected.len() - max);
            }
        }
        selected
    }

    pub fn stats(&self) -> StreamStats {
        let inner = self.inner.lock();
        let mut by_type = BTreeMap::new();
        for event in &inner.events {
            *by_type.entry(event.event_type.clone()).or_insert(0) += 1;
        }
        StreamStats {
            total_events: inner.total_events,
            current_events: inner.events.len(),
            earliest_ms: inner.events.front().map(|e| e.timestamp_ms),
            latest_ms: inner.events.back().map(|e| e.timestamp_ms),
            by_type,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    /// Drop every event older than `max_age_ms`. Called by the sweep timer;
    /// exposed so tests can drive it under mock time.
    pub fn sweep(&self) {
        if self.config.max_age_ms <= 0 {
            return;
        }
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(self.config.max_age_ms as u64);
        let mut inner = self.inner.lock();
        let before = inner.events.len();
        while inner
            .events
            .front()
            .is_some_and(|e| e.timestamp_ms < cutoff)
        {
            inner.events.pop_front();
        }
        let swept = before - inner.events.len();
        if swept > 0 && self.config.debug {
            debug!(stream = %self.name, swept, "age sweep removed events");
        }
    }

    /// Clear the live buffer without destroying the stream. `total_events`
    /// is preserved.
    pub fn clear(&self) {
        self.inner.lock().events.clear();
    }

    /// Stop the sweep timer and clear all state. The manager removes
    /// destroyed streams from its registry.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self.sweeper.lock().take() {
            token.cancel();
        }
        self.inner.lock().events.clear();
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        if self.config.max_age_ms <= 0 || self.config.sweep_interval_ms == 0 {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime; callers drive sweep() themselves.
            return;
        };

        let token = CancellationToken::new();
        *self.sweeper.lock() = Some(token.clone());

        let period = Duration::from_millis(self.config.sweep_interval_ms);
        let stream = Arc::downgrade(self);
        handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = interval.tick() => {
                        let Some(stream) = stream.upgrade() else { return };
                        stream.sweep();
                    }
                }
            }
        });
    }
}

impl Drop for BehaviorStream {
    fn drop(&mut self) {
        if let Some(token) = self.sweeper.lock().take() {
            token.cancel();
        }
    }
}
