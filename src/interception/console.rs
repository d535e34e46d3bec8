// src/interception/console.rs
//! Console tap
//!
//! Wraps the host's console-error slot. The saved slot always runs first, so
//! capture never changes what the embedding application sees on its console.
//! The SDK's own diagnostics (prefixed lines) and messages on the ignore
//! list are passed through without capture.

use std::sync::Arc;

use super::Uninstall;
use crate::bus::{EventBus, TapEvent};
use crate::host::{Capability, Host};
use crate::utils::{patterns, Clock, Result, SDK_LOG_PREFIX};

pub(crate) fn install(
    host: &Arc<Host>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    ignore_errors: Vec<String>,
) -> Result<Option<Uninstall>> {
    if !host.supports(Capability::Console) {
        return Ok(None);
    }

    let saved = host.console_error_slot();
    let original = Arc::clone(&saved);
    host.set_console_error(Arc::new(move |args| {
        saved(args);

        if args
            .first()
            .is_some_and(|arg| arg.starts_with(SDK_LOG_PREFIX))
        {
            return;
        }
        let joined = args.join(" ");
        if patterns::matches_any(&ignore_errors, &joined) {
            return;
        }
        bus.emit(&TapEvent::ConsoleError {
            args: args.to_vec(),
            timestamp_ms: clock.now_ms(),
        });
    }));

    let host = Arc::clone(host);
    Ok(Some(Box::new(move || {
        host.set_console_error(original);
    })))
}
