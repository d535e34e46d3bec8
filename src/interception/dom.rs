// src/interception/dom.rs
//! Lifecycle and error taps
//!
//! Passthrough listeners on the host's event registry: each installed tap
//! forwards one host event kind onto the bus as its canonical event. Error
//! payloads (uncaught errors and unhandled rejections) are screened against
//! the ignore list first.

use std::sync::Arc;

use super::{TapKind, Uninstall};
use crate::bus::{EventBus, TapEvent};
use crate::host::{Capability, Host, HostEvent, HostEventKind};
use crate::utils::{patterns, Result};

fn host_event_kind(kind: TapKind) -> Option<HostEventKind> {
    match kind {
        TapKind::DomError => Some(HostEventKind::DomError),
        TapKind::UnhandledRejection => Some(HostEventKind::UnhandledRejection),
        TapKind::Load => Some(HostEventKind::Load),
        TapKind::BeforeUnload => Some(HostEventKind::BeforeUnload),
        TapKind::HashChange => Some(HostEventKind::HashChange),
        TapKind::PopState => Some(HostEventKind::PopState),
        TapKind::Online => Some(HostEventKind::Online),
        TapKind::Offline => Some(HostEventKind::Offline),
        TapKind::ReadyStateChange => Some(HostEventKind::ReadyStateChange),
        TapKind::Network | TapKind::Console | TapKind::History | TapKind::Click => None,
    }
}

fn canonical(event: &HostEvent) -> Option<TapEvent> {
    match event {
        HostEvent::DomError {
            message,
            source,
            line,
            column,
        } => Some(TapEvent::DomError {
            message: message.clone(),
            source: source.clone(),
            line: *line,
            column: *column,
        }),
        HostEvent::UnhandledRejection { reason } => Some(TapEvent::UnhandledRejection {
            reason: reason.clone(),
        }),
        HostEvent::Load => Some(TapEvent::Load),
        HostEvent::BeforeUnload => Some(TapEvent::BeforeUnload),
        HostEvent::HashChange { from, to } => Some(TapEvent::HashChange {
            from: from.clone(),
            to: to.clone(),
        }),
        HostEvent::PopState { url } => Some(TapEvent::PopState { url: url.clone() }),
        HostEvent::Online => Some(TapEvent::Online),
        HostEvent::Offline => Some(TapEvent::Offline),
        HostEvent::ReadyStateChange { state } => Some(TapEvent::ReadyStateChange {
            state: state.clone(),
        }),
        HostEvent::Click { .. } => None,
    }
}

pub(crate) fn install(
    host: &Arc<Host>,
    bus: Arc<EventBus>,
    kind: TapKind,
    ignore_errors: Vec<String>,
) -> Result<Option<Uninstall>> {
    if !host.supports(Capability::DomEvents) {
        return Ok(None);
    }
    let Some(host_kind) = host_event_kind(kind) else {
        return Ok(None);
    };

    let listener = host.add_listener(
        host_kind,
        Arc::new(move |event| {
            let screened = match event {
                HostEvent::DomError { message, .. } => {
                    patterns::matches_any(&ignore_errors, message)
                }
                HostEvent::UnhandledRejection { reason } => {
                    patterns::matches_any(&ignore_errors, reason)
                }
                _ => false,
            };
            if screened {
                return;
            }
            if let Some(canonical) = canonical(event) {
                bus.emit(&canonical);
            }
        }),
    );

    let host = Arc::clone(host);
    Ok(Some(Box::new(move || {
        host.remove_listener(listener);
    })))
}
