// src/plugin.rs
//! Plugin contract
//!
//! A plugin extends the SDK through the facade: it may subscribe to bus
//! events, write into behavior streams, and queue report items. Plugins are
//! installed once, after the core is wired; a failing install never takes
//! the instance down.

use crate::behavior::{EventContext, NewBehaviorEvent};
use crate::bus::{EventKind, TapEvent};
use crate::sdk::Facade;
use crate::utils::Result;

/// Extension installed against the facade.
pub trait Plugin: Send {
    /// Stable name used in diagnostics.
    fn name(&self) -> &str;

    /// Wire the plugin up. Runs once per instance.
    fn install(&mut self, facade: &Facade) -> Result<()>;
}

/// Built-in plugin recording user activity into a behavior stream: clicks,
/// route changes, and completed network requests.
#[derive(Debug, Default)]
pub struct BehaviorPlugin {
    stream: Option<String>,
}

impl BehaviorPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record into the named stream instead of the default one.
    pub fn with_stream(stream: impl Into<String>) -> Self {
        Self {
            stream: Some(stream.into()),
        }
    }
}

impl Plugin for BehaviorPlugin {
    fn name(&self) -> &str {
        "behavior"
    }

    fn install(&mut self, facade: &Facade) -> Result<()> {
        let bus = facade.bus();
        let streams = std::sync::Arc::clone(facade.streams());
        let stream_name = self.stream.clone();

        let record = move |event: NewBehaviorEvent| {
            // resolve per event so stream recreation is picked up
            if let Some(stream) = streams.get_stream(stream_name.as_deref()) {
                stream.add_event(event);
            }
        };

        let on_click = record.clone();
        bus.subscribe(EventKind::Click, move |event| {
            if let TapEvent::Click(raw) = event {
                on_click(
                    NewBehaviorEvent::new(
                        "click",
                        EventContext::Element {
                            tag: raw.target.tag.clone(),
                            id: raw.target.id.clone(),
                            text: raw.target.text.clone(),
                            path: raw.target.path_to_body(),
                        },
                    )
                    .with_page_url(raw.page_url.clone()),
                );
            }
            Ok(())
        });

        let on_route = record.clone();
        bus.subscribe(EventKind::RouteChange, move |event| {
            if let TapEvent::RouteChange { from, to, .. } = event {
                on_route(
                    NewBehaviorEvent::new(
                        "route_change",
                        EventContext::Route {
                            from: from.clone(),
                            to: to.clone(),
                        },
                    )
                    .with_page_url(to.clone()),
                );
            }
            Ok(())
        });

        bus.subscribe(EventKind::RequestEnd, move |event| {
            if let TapEvent::RequestEnd {
                url,
                method,
                status,
                duration_ms,
                ..
            } = event
            {
                record(NewBehaviorEvent::new(
                    "network",
                    EventContext::Network {
                        url: url.clone(),
                        method: method.clone(),
                        status: *status,
                        duration_ms: Some(*duration_ms),
                    },
                ));
            }
            Ok(())
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{NavigationMode, RawClick};
    use crate::config::SdkConfig;
    use crate::host::element::Element;
    use crate::host::Host;
    use crate::pipeline::{MemoryOfflineStore, MockTransport};
    use crate::sdk::Sdk;
    use std::sync::Arc;

    async fn sdk_with_plugin(plugin: BehaviorPlugin) -> Sdk {
        let sdk = Sdk::init_with(
            SdkConfig::new("https://collect.example.com"),
            Host::new("https://app.example.com/"),
            MockTransport::new(),
            MemoryOfflineStore::new(),
        )
        .await
        .unwrap();
        sdk.use_plugin(plugin);
        sdk
    }

    fn raw_click() -> TapEvent {
        TapEvent::Click(RawClick {
            target: Arc::new(Element::new("button").with_id("cta")),
            x: 1.0,
            y: 2.0,
            page_url: "https://app.example.com/cart".to_string(),
            timestamp_ms: 10,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_recorded_on_default_stream() {
        let sdk = sdk_with_plugin(BehaviorPlugin::new()).await;
        let facade = sdk.facade();

        facade.bus().emit(&raw_click());
        facade.bus().emit(&TapEvent::RouteChange {
            from: "https://app.example.com/".to_string(),
            to: "https://app.example.com/cart".to_string(),
            mode: NavigationMode::Push,
            timestamp_ms: 11,
        });
        facade.bus().emit(&TapEvent::RequestEnd {
            request_id: "r1".to_string(),
            url: "https://api.example.com/cart".to_string(),
            method: "POST".to_string(),
            status: Some(200),
            error: None,
            duration_ms: 45,
            timestamp_ms: 12,
        });

        let stream = facade.stream(None).unwrap();
        let stats = stream.stats();
        assert_eq!(stats.current_events, 3);
        assert_eq!(stats.by_type.get("click"), Some(&1));
        assert_eq!(stats.by_type.get("route_change"), Some(&1));
        assert_eq!(stats.by_type.get("network"), Some(&1));

        let events = stream.snapshot(&Default::default());
        assert_eq!(events[0].page_url, "https://app.example.com/cart");
        sdk.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_named_stream_target() {
        let sdk = sdk_with_plugin(BehaviorPlugin::with_stream("audit")).await;
        let facade = sdk.facade();
        facade.streams().create_stream("audit", None);

        facade.bus().emit(&raw_click());

        assert_eq!(facade.stream(Some("audit")).unwrap().len(), 1);
        assert!(facade.stream(None).unwrap().is_empty());
        sdk.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_plugin_leaves_sdk_usable() {
        struct Broken;
        impl Plugin for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn install(&mut self, _facade: &Facade) -> Result<()> {
                Err(crate::utils::SdkError::PluginInstall("nope".to_string()))
            }
        }

        let sdk = Sdk::init_with(
            SdkConfig::new("https://collect.example.com"),
            Host::new("https://app.example.com/"),
            MockTransport::new(),
            MemoryOfflineStore::new(),
        )
        .await
        .unwrap();

        sdk.use_plugin(Broken);
        assert!(sdk.track("still_alive", serde_json::json!({}), false));
        sdk.shutdown().await;
    }
}
