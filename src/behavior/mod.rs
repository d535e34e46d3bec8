// src/behavior/mod.rs
//! Behavior capture: bounded, age-limited event streams
//!
//! - **BehaviorStream**: one ring buffer of normalized behavior events with
//!   optional acceptance filtering, periodic age sweep, and snapshot/stats
//!   queries
//! - **StreamManager**: named registry over multiple streams, always owning
//!   a `default` stream
//!
//! Events are immutable once accepted; eviction is oldest-first on overflow,
//! and the age sweep runs on its own timer rather than on every insert.

pub mod manager;
pub mod stream;

pub use manager::{StreamManager, DEFAULT_STREAM};
pub use stream::{BehaviorStream, EventFilter, SnapshotQuery, StreamConfig, StreamStats};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured context carried by a behavior event, discriminated by shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventContext {
    Element {
        tag: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        path: Vec<String>,
    },
    Network {
        url: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Route {
        from: String,
        to: String,
    },
    Page {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Viewport {
        width: u32,
        height: u32,
    },
    Custom {
        #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
        fields: BTreeMap<String, serde_json::Value>,
    },
}

impl EventContext {
    pub fn custom() -> Self {
        EventContext::Custom {
            fields: BTreeMap::new(),
        }
    }
}

/// One normalized occurrence stored in a behavior stream.
///
/// Immutable after acceptance; streams never mutate stored events in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorEvent {
    pub id: String,
    pub event_type: String,
    pub timestamp_ms: u64,
    pub page_url: String,
    pub context: EventContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<serde_json::Value>,
}

/// Caller-supplied portion of a behavior event; the stream stamps id,
/// timestamp, and (when absent) the current page URL.
#[derive(Debug, Clone)]
pub struct NewBehaviorEvent {
    pub event_type: String,
    pub context: EventContext,
    pub custom_data: Option<serde_json::Value>,
    pub page_url: Option<String>,
}

impl NewBehaviorEvent {
    pub fn new(event_type: impl Into<String>, context: EventContext) -> Self {
        Self {
            event_type: event_type.into(),
            context,
            custom_data: None,
            page_url: None,
        }
    }

    pub fn with_custom_data(mut self, data: serde_json::Value) -> Self {
        self.custom_data = Some(data);
        self
    }

    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }
}
