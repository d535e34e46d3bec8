// src/interception/click.rs
//! Click capture and enrichment
//!
//! The click tap listens on the host's click dispatch. Every accepted click
//! is first published raw on the bus; clicks landing on (or inside) an
//! element carrying the tracking attribute are additionally enriched into a
//! `ClickRecord` and published as `ClickTracked`.
//!
//! Acceptance order: runtime toggle, throttle window, ignore selectors.
//! A click rejected at any of these stages produces no bus traffic at all.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::Uninstall;
use crate::bus::{EventBus, RawClick, TapEvent};
use crate::config::ClickConfig;
use crate::host::element::Element;
use crate::host::{Capability, Host, HostEvent, HostEventKind};
use crate::utils::{Clock, Result};

/// Attribute marking an element for enriched click capture.
pub const TRACKING_ID_ATTR: &str = "data-tl-id";

/// Attribute carrying a human-readable title for the marker element.
pub const TITLE_ATTR: &str = "data-tl-title";

/// Namespace prefix; all attributes under it are captured onto the record.
pub const ATTR_PREFIX: &str = "data-tl-";

/// Pointer coordinates at click time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickPosition {
    pub x: f64,
    pub y: f64,
}

/// Enriched click, built from the nearest marker ancestor of the click target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickRecord {
    /// Value of the tracking attribute on the marker element
    pub tracking_id: String,

    /// Value of the title attribute on the marker element, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Namespaced and explicitly requested attributes of the marker element
    pub attributes: BTreeMap<String, String>,

    /// Page URL at click time
    pub page_url: String,

    /// Click time (epoch milliseconds)
    pub timestamp_ms: u64,

    /// Structural path from the click target up to the marker element
    pub path: Vec<String>,

    /// Pointer coordinates, when position capture is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<ClickPosition>,

    /// Click target's element id, when element-info capture is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,

    /// Click target's text, truncated, when element-info capture is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,
}

/// Install the click tap on the host's click dispatch.
pub(crate) fn install(
    host: &Arc<Host>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: ClickConfig,
    enabled: Arc<AtomicBool>,
) -> Result<Option<Uninstall>> {
    if !host.supports(Capability::DomEvents) {
        return Ok(None);
    }

    let page_url = host.page_url_handle();
    let last_click_ms: Mutex<Option<u64>> = Mutex::new(None);

    let listener = host.add_listener(
        HostEventKind::Click,
        Arc::new(move |event| {
            let HostEvent::Click { target, x, y } = event else {
                return;
            };
            if !enabled.load(Ordering::SeqCst) {
                return;
            }

            let now = clock.now_ms();
            {
                let mut last = last_click_ms.lock();
                if let Some(prev) = *last {
                    if now.saturating_sub(prev) < config.throttle_ms {
                        return;
                    }
                }
                *last = Some(now);
            }

            // an ignored element suppresses the click for itself and its
            // whole subtree
            if target
                .ancestors()
                .any(|el| config.ignore_selectors.iter().any(|s| el.matches_selector(s)))
            {
                return;
            }

            let page_url = page_url.read().clone();
            bus.emit(&TapEvent::Click(RawClick {
                target: Arc::clone(target),
                x: *x,
                y: *y,
                page_url: page_url.clone(),
                timestamp_ms: now,
            }));

            let Some(marker) = target.closest(|el| el.attr(TRACKING_ID_ATTR).is_some()) else {
                return;
            };
            let record = build_record(&marker, target, *x, *y, page_url, now, &config);
            let record = match &config.before_send {
                Some(hook) => match (hook.0)(record) {
                    Some(record) => record,
                    None => return,
                },
                None => record,
            };
            bus.emit(&TapEvent::ClickTracked(record));
        }),
    );

    let host = Arc::clone(host);
    Ok(Some(Box::new(move || {
        host.remove_listener(listener);
    })))
}

fn build_record(
    marker: &Arc<Element>,
    target: &Arc<Element>,
    x: f64,
    y: f64,
    page_url: String,
    timestamp_ms: u64,
    config: &ClickConfig,
) -> ClickRecord {
    let mut attributes = BTreeMap::new();
    for (name, value) in &marker.attributes {
        let namespaced = name.starts_with(ATTR_PREFIX) && name != TRACKING_ID_ATTR && name != TITLE_ATTR;
        if namespaced || config.custom_attributes.contains(name) {
            attributes.insert(name.clone(), value.clone());
        }
    }

    let mut path = Vec::new();
    for el in target.ancestors() {
        path.push(el.descriptor());
        if Arc::ptr_eq(&el, marker) {
            break;
        }
    }

    let (element_id, element_text) = if config.capture_element_info {
        let text = target
            .text
            .as_ref()
            .map(|t| t.chars().take(config.max_element_text_length).collect());
        (target.id.clone(), text)
    } else {
        (None, None)
    };

    ClickRecord {
        tracking_id: marker.attr(TRACKING_ID_ATTR).unwrap_or_default().to_string(),
        title: marker.attr(TITLE_ATTR).map(str::to_string),
        attributes,
        page_url,
        timestamp_ms,
        path,
        position: config.capture_position.then_some(ClickPosition { x, y }),
        element_id,
        element_text,
    }
}
