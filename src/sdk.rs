// src/sdk.rs
//! SDK entry point and plugin facade
//!
//! `Sdk::init` runs in two phases: first every component is constructed and
//! wired (bus subscriptions, connectivity and teardown hooks), then the taps
//! are installed over the host. Nothing observes the host until the pipeline
//! behind it is ready to receive.
//!
//! The `Facade` is the narrow surface handed to plugins: bus access, the
//! stream registry, and pipeline ingestion. It deliberately exposes neither
//! the host nor the interceptor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::behavior::{BehaviorStream, EventContext, NewBehaviorEvent, StreamConfig, StreamManager};
use crate::bus::{EventBus, EventKind, TapEvent};
use crate::config::SdkConfig;
use crate::host::Host;
use crate::interception::Interceptor;
use crate::pipeline::{
    ClickBatcher, FileOfflineStore, HttpTransport, OfflineStore, ReportPayload, Sender,
    SenderStats, Transport,
};
use crate::plugin::Plugin;
use crate::utils::{Clock, Result, SystemClock};

/// Surface handed to plugins and embedders: bus, streams, ingestion, and
/// the click-capture toggle.
#[derive(Clone)]
pub struct Facade {
    config: Arc<SdkConfig>,
    bus: Arc<EventBus>,
    sender: Arc<Sender>,
    streams: Arc<StreamManager>,
    click_enabled: Arc<AtomicBool>,
}

impl Facade {
    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.streams
    }

    /// Look up a stream; `None` names the default stream.
    pub fn stream(&self, name: Option<&str>) -> Option<Arc<BehaviorStream>> {
        self.streams.get_stream(name)
    }

    /// Create (or replace) a named stream.
    pub fn create_stream(
        &self,
        name: &str,
        config: Option<StreamConfig>,
    ) -> Arc<BehaviorStream> {
        self.streams.create_stream(name, config)
    }

    /// Queue one report item for delivery. Returns whether it was queued.
    pub fn send_data(
        &self,
        payload: ReportPayload,
        sub_type: impl Into<String>,
        is_immediate: bool,
    ) -> bool {
        self.sender.send_data(payload, sub_type, is_immediate)
    }

    /// Queue one custom report under the given type tag.
    pub fn track(
        &self,
        event_type: impl Into<String>,
        data: serde_json::Value,
        is_immediate: bool,
    ) -> bool {
        self.send_data(ReportPayload::Custom(data), event_type, is_immediate)
    }

    /// Record a custom behavior event on the default stream.
    pub fn record_behavior(
        &self,
        event_type: impl Into<String>,
        custom_data: serde_json::Value,
    ) -> bool {
        match self.streams.get_stream(None) {
            Some(stream) => stream.add_event(
                NewBehaviorEvent::new(event_type, EventContext::custom())
                    .with_custom_data(custom_data),
            ),
            None => false,
        }
    }

    pub fn enable_click(&self) {
        self.click_enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable_click(&self) {
        self.click_enabled.store(false, Ordering::SeqCst);
    }

    pub fn click_status(&self) -> bool {
        self.click_enabled.load(Ordering::SeqCst)
    }

    /// Snapshot a stream and queue it as one behavior report.
    pub fn report_stream(&self, name: Option<&str>, sub_type: impl Into<String>) -> bool {
        let Some(stream) = self.streams.get_stream(name) else {
            return false;
        };
        let snapshot = stream.snapshot(&Default::default());
        if snapshot.is_empty() {
            return false;
        }
        match serde_json::to_value(&snapshot) {
            Ok(events) => self.send_data(ReportPayload::Behavior(events), sub_type, false),
            Err(e) => {
                warn!(error = %e, "stream snapshot serialization failed");
                false
            }
        }
    }
}

/// The assembled SDK instance.
pub struct Sdk {
    facade: Facade,
    host: Arc<Host>,
    interceptor: Interceptor,
    click_batcher: Arc<ClickBatcher>,
}

impl Sdk {
    /// Initialize against the default HTTP transport and a file-backed
    /// offline store under the system temp directory.
    pub async fn init(config: SdkConfig, host: Arc<Host>) -> Result<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(&config.dsn, config.timeout_ms)?);
        let store: Arc<dyn OfflineStore> = Arc::new(FileOfflineStore::new(
            std::env::temp_dir().join("traceline"),
            &config.offline_storage_key,
        )?);
        Self::init_with(config, host, transport, store).await
    }

    /// Initialize with explicit transport and offline store.
    pub async fn init_with(
        config: SdkConfig,
        host: Arc<Host>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn OfflineStore>,
    ) -> Result<Self> {
        config.validate()?;

        // phase one: construct and wire
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let bus = Arc::new(EventBus::new());
        let shared_config = Arc::new(config.clone());

        let streams = Arc::new(StreamManager::new(
            StreamConfig {
                max_size: config.behavior.max_size,
                max_age_ms: config.behavior.max_age_ms,
                sweep_interval_ms: config.behavior.sweep_interval_ms,
                debug: config.behavior.debug,
                filter: None,
            },
            Arc::clone(&clock),
            host.page_url_handle(),
        ));

        let sender = Sender::new(
            Arc::clone(&shared_config),
            Arc::clone(&transport),
            store,
            Arc::clone(&clock),
            host.page_url_handle(),
        );
        sender.restore_offline().await;
        sender.start();

        let click_batcher = Arc::new(ClickBatcher::new(
            config.cache_max_length,
            config.cache_waiting_time_ms,
            transport,
            config.behavior.click.after_send.clone(),
        ));

        {
            let online_sender = Arc::clone(&sender);
            bus.subscribe(EventKind::Online, move |_| {
                online_sender.set_online(true);
                Ok(())
            });
            let offline_sender = Arc::clone(&sender);
            bus.subscribe(EventKind::Offline, move |_| {
                offline_sender.set_online(false);
                Ok(())
            });
            let unload_sender = Arc::clone(&sender);
            bus.subscribe(EventKind::BeforeUnload, move |_| {
                unload_sender.final_flush();
                Ok(())
            });
            let batcher = Arc::clone(&click_batcher);
            bus.subscribe(EventKind::ClickTracked, move |event| {
                if let TapEvent::ClickTracked(record) = event {
                    batcher.push(record.clone());
                }
                Ok(())
            });
        }

        let click_enabled = Arc::new(AtomicBool::new(config.behavior.click.enabled));
        let interceptor = Interceptor::new(
            Arc::clone(&host),
            Arc::clone(&bus),
            clock,
            config,
            Arc::clone(&click_enabled),
        );

        // phase two: observe the host
        interceptor.initialize(None);
        info!(taps = interceptor.installed_count(), "sdk initialized");

        Ok(Self {
            facade: Facade {
                config: shared_config,
                bus,
                sender,
                streams,
                click_enabled,
            },
            host,
            interceptor,
            click_batcher,
        })
    }

    pub fn facade(&self) -> &Facade {
        &self.facade
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Install a plugin against the facade. A failing install is logged and
    /// the instance stays usable.
    pub fn use_plugin(&self, mut plugin: impl Plugin) -> &Self {
        let name = plugin.name().to_string();
        match plugin.install(&self.facade) {
            Ok(()) => info!(plugin = %name, "plugin installed"),
            Err(e) => warn!(plugin = %name, error = %e, "plugin installation failed"),
        }
        self
    }

    /// Queue one report item for delivery.
    pub fn send_data(
        &self,
        payload: ReportPayload,
        sub_type: impl Into<String>,
        is_immediate: bool,
    ) -> bool {
        self.facade.send_data(payload, sub_type, is_immediate)
    }

    /// Queue one custom report under the given type tag.
    pub fn track(
        &self,
        event_type: impl Into<String>,
        data: serde_json::Value,
        is_immediate: bool,
    ) -> bool {
        self.facade.track(event_type, data, is_immediate)
    }

    pub fn enable_click(&self) {
        self.facade.enable_click();
    }

    pub fn disable_click(&self) {
        self.facade.disable_click();
    }

    pub fn click_status(&self) -> bool {
        self.facade.click_status()
    }

    pub fn stats(&self) -> SenderStats {
        self.facade.sender.stats()
    }

    /// Tear the instance down: restore the host, stop the scheduler, flush
    /// and persist what remains, and destroy the streams.
    pub async fn shutdown(&self) {
        self.interceptor.teardown();
        self.facade.sender.stop();
        self.facade.sender.final_flush();
        self.click_batcher.stop().await;
        self.facade.streams.destroy_all();
        info!("sdk shut down");
    }
}
