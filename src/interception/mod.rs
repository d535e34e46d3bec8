// src/interception/mod.rs
//! Interception layer
//!
//! Installs taps over the host's API slots and event registry, translating
//! raw host activity into canonical bus events. Installation is reversible:
//! every tap saves what it wraps and `teardown` restores it.
//!
//! - **network**: fetch/xhr slot wrappers with request ids and timing
//! - **console**: console-error wrapper with self- and ignore-exclusion
//! - **navigation**: push/replace history wrappers emitting route changes
//! - **dom**: passthrough listeners for lifecycle and error events
//! - **click**: click capture, throttling, and marker-based enrichment
//!
//! A tap whose host capability is missing is skipped silently; a tap whose
//! installation fails is logged and skipped, leaving the rest installed.

pub mod click;
pub mod console;
pub mod dom;
pub mod navigation;
pub mod network;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::config::SdkConfig;
use crate::host::Host;
use crate::utils::Clock;

/// One installable tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapKind {
    Network,
    Console,
    History,
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

impl TapKind {
    pub const ALL: [TapKind; 13] = [
        TapKind::Network,
        TapKind::Console,
        TapKind::History,
        TapKind::DomError,
        TapKind::UnhandledRejection,
        TapKind::Load,
        TapKind::BeforeUnload,
        TapKind::HashChange,
        TapKind::PopState,
        TapKind::Online,
        TapKind::Offline,
        TapKind::ReadyStateChange,
        TapKind::Click,
    ];
}

/// Restores whatever a tap wrapped or registered.
pub type Uninstall = Box<dyn FnOnce() + Send>;

/// Coordinates tap installation and teardown.
pub struct Interceptor {
    host: Arc<Host>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: SdkConfig,
    click_enabled: Arc<AtomicBool>,
    installed: Mutex<HashMap<TapKind, Uninstall>>,
}

impl Interceptor {
    pub fn new(
        host: Arc<Host>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: SdkConfig,
        click_enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            host,
            bus,
            clock,
            config,
            click_enabled,
            installed: Mutex::new(HashMap::new()),
        }
    }

    /// Install the given taps, or every tap when `subset` is `None`. Taps
    /// disabled by configuration, already installed, or without their host
    /// capability are skipped; an installation failure is logged and does
    /// not stop the remaining installs.
    pub fn initialize(&self, subset: Option<&[TapKind]>) {
        let kinds: Vec<TapKind> = match subset {
            Some(kinds) => kinds.to_vec(),
            None => TapKind::ALL.to_vec(),
        };

        for kind in kinds {
            if !self.config.behavior.listeners.allows(kind) {
                debug!(?kind, "tap disabled by configuration");
                continue;
            }
            if self.installed.lock().contains_key(&kind) {
                continue;
            }
            match self.install(kind) {
                Ok(Some(uninstall)) => {
                    debug!(?kind, "tap installed");
                    self.installed.lock().insert(kind, uninstall);
                }
                Ok(None) => debug!(?kind, "host capability missing, tap skipped"),
                Err(e) => warn!(?kind, error = %e, "tap installation failed"),
            }
        }
    }

    fn install(&self, kind: TapKind) -> crate::utils::Result<Option<Uninstall>> {
        let bus = Arc::clone(&self.bus);
        let clock = Arc::clone(&self.clock);
        match kind {
            TapKind::Network => {
                // the SDK's own delivery traffic is never observed
                let mut ignore = self.config.ignore_request.clone();
                ignore.push(self.config.dsn.clone());
                network::install(&self.host, bus, clock, ignore)
            }
            TapKind::Console => console::install(
                &self.host,
                bus,
                clock,
                self.config.ignore_errors.clone(),
            ),
            TapKind::History => navigation::install(&self.host, bus, clock),
            TapKind::Click => click::install(
                &self.host,
                bus,
                clock,
                self.config.behavior.click.clone(),
                Arc::clone(&self.click_enabled),
            ),
            _ => dom::install(&self.host, bus, kind, self.config.ignore_errors.clone()),
        }
    }

    /// Uninstall every installed tap, restoring the saved slots and
    /// removing the registered listeners.
    pub fn teardown(&self) {
        let installed: Vec<(TapKind, Uninstall)> =
            self.installed.lock().drain().collect();
        for (kind, uninstall) in installed {
            uninstall();
            debug!(?kind, "tap removed");
        }
    }

    pub fn is_installed(&self, kind: TapKind) -> bool {
        self.installed.lock().contains_key(&kind)
    }

    pub fn installed_count(&self) -> usize {
        self.installed.lock().len()
    }
}
