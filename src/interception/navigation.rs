// src/interception/navigation.rs
//! History tap
//!
//! Wraps the host's push-state and replace-state slots to observe in-app
//! route transitions. The previous URL is read before the saved slot runs,
//! so `from`/`to` bracket the transition regardless of what the slot does.

use std::sync::Arc;

use parking_lot::RwLock;

use super::Uninstall;
use crate::bus::{EventBus, NavigationMode, TapEvent};
use crate::host::{Capability, Host, HistoryFn};
use crate::utils::{Clock, Result};

pub(crate) fn install(
    host: &Arc<Host>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
) -> Result<Option<Uninstall>> {
    if !host.supports(Capability::History) {
        return Ok(None);
    }

    let saved_push = host.push_state_slot();
    let saved_replace = host.replace_state_slot();

    host.set_push_state(wrap(
        Arc::clone(&saved_push),
        Arc::clone(&bus),
        Arc::clone(&clock),
        host.page_url_handle(),
        NavigationMode::Push,
    ));
    host.set_replace_state(wrap(
        Arc::clone(&saved_replace),
        bus,
        clock,
        host.page_url_handle(),
        NavigationMode::Replace,
    ));

    let host = Arc::clone(host);
    Ok(Some(Box::new(move || {
        host.set_push_state(saved_push);
        host.set_replace_state(saved_replace);
    })))
}

fn wrap(
    saved: Arc<HistoryFn>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    page_url: Arc<RwLock<String>>,
    mode: NavigationMode,
) -> Arc<HistoryFn> {
    Arc::new(move |url| {
        let from = page_url.read().clone();
        saved(url);
        bus.emit(&TapEvent::RouteChange {
            from,
            to: url.to_string(),
            mode,
            timestamp_ms: clock.now_ms(),
        });
    })
}
