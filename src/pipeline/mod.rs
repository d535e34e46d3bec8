// src/pipeline/mod.rs
//! Delivery pipeline
//!
//! Everything between `send_data` and the collection endpoint:
//!
//! - **Queue**: live report-item deque (FIFO, immediate items jump the head)
//! - **Sender**: sampling gate, periodic scheduler, batch flush, eager drain,
//!   retry/backoff, archival, online/offline handling, teardown flush
//! - **Transport**: gzip JSON envelope, beacon-vs-request selection
//! - **Offline**: durable single-key persistence of undelivered items
//! - **Click Batch**: debounced side channel for enriched click records
//!
//! ```text
//! send_data() → sampling → Queue → scheduler tick → flush batch
//!                                       │               │
//!                                       │          Transport (gzip)
//!                                       │            ok │ fail
//!                                       │   eager drain ◄┴► retry/backoff
//!                                       │                      │ exhausted
//!                                       └──────────── OfflineStore
//! ```

pub mod click_batch;
pub mod offline;
pub mod queue;
pub mod sender;
pub mod transport;

pub use click_batch::ClickBatcher;
pub use offline::{FileOfflineStore, MemoryOfflineStore, OfflineStore};
pub use queue::ReportQueue;
pub use sender::{Sender, SenderStats};
pub use transport::{HttpTransport, Transport, BEACON_MAX_BYTES};
#[cfg(test)]
pub use transport::MockTransport;

use serde::{Deserialize, Serialize};

/// Telemetry payload, discriminated by report category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ReportPayload {
    Error(serde_json::Value),
    Performance(serde_json::Value),
    Behavior(serde_json::Value),
    Custom(serde_json::Value),
}

impl ReportPayload {
    pub fn category(&self) -> &'static str {
        match self {
            ReportPayload::Error(_) => "error",
            ReportPayload::Performance(_) => "performance",
            ReportPayload::Behavior(_) => "behavior",
            ReportPayload::Custom(_) => "custom",
        }
    }
}

/// One unit of telemetry awaiting delivery.
///
/// An item is in exactly one place at a time: the live queue, an in-flight
/// batch, or the offline archive. `retry_count` only ever increases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportItem {
    pub id: String,
    #[serde(flatten)]
    pub payload: ReportPayload,
    pub sub_type: String,
    pub timestamp_ms: u64,
    pub is_immediate: bool,
    pub retry_count: u32,
}

/// App/device/session metadata attached to every envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseInfo {
    pub app_name: String,
    pub app_code: String,
    pub app_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_uuid: Option<String>,
    pub sdk_version: String,
    pub session_id: String,
    pub page_url: String,
    /// Envelope send time (epoch milliseconds)
    pub send_time: u64,
}

/// Wire envelope: the batch plus its base info, gzip-compressed on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<'a> {
    pub data_queue: &'a [ReportItem],
    pub base_info: &'a BaseInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_item_wire_shape() {
        let item = ReportItem {
            id: "01H".to_string(),
            payload: ReportPayload::Error(json!({"message": "boom"})),
            sub_type: "console".to_string(),
            timestamp_ms: 42,
            is_immediate: true,
            retry_count: 0,
        };

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["message"], "boom");
        assert_eq!(value["subType"], "console");
        assert_eq!(value["isImmediate"], true);

        let back: ReportItem = serde_json::from_value(value).unwrap();
        assert_eq!(back.payload.category(), "error");
    }

    #[test]
    fn test_envelope_keys_are_camel_case() {
        let base_info = BaseInfo {
            app_name: "shop".to_string(),
            app_code: "shop-web".to_string(),
            app_version: "1.2.3".to_string(),
            user_uuid: None,
            sdk_version: "0.1.0".to_string(),
            session_id: "sess_1".to_string(),
            page_url: "https://app.example.com/".to_string(),
            send_time: 7,
        };
        let envelope = Envelope {
            data_queue: &[],
            base_info: &base_info,
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("dataQueue").is_some());
        assert_eq!(value["baseInfo"]["appName"], "shop");
        assert_eq!(value["baseInfo"]["sendTime"], 7);
    }
}
