// src/pipeline/transport.rs
//! Batch transport
//!
//! Serializes the envelope to JSON, gzip-compresses it, then picks a path:
//! payloads at or under the beacon threshold prefer the fire-and-forget
//! beacon primitive (survives page unload, no response awaited); everything
//! else, or a declined beacon, goes through the request/response transport
//! where any non-success status is a transport failure.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

#[cfg(test)]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use parking_lot::Mutex;

use super::{BaseInfo, Envelope, ReportItem};
use crate::utils::{Result, SdkError};

/// Compressed payloads at or under this size may use the beacon path.
pub const BEACON_MAX_BYTES: usize = 60 * 1024;

/// Delivery primitive pair the sender drives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget one-way delivery. Returns true when the payload was
    /// accepted for delivery; no response is awaited. Default: unavailable.
    fn send_beacon(&self, _payload: &Bytes) -> bool {
        false
    }

    /// Request/response delivery; non-success statuses are failures.
    async fn send(&self, payload: Bytes) -> Result<()>;
}

/// Gzip-compress a serialized payload.
pub fn gzip(data: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SdkError::Transport(format!("gzip write: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| SdkError::Transport(format!("gzip finish: {e}")))?;
    Ok(Bytes::from(compressed))
}

/// Serialize and compress one batch envelope.
pub fn encode_envelope(items: &[ReportItem], base_info: &BaseInfo) -> Result<Bytes> {
    let json = serde_json::to_vec(&Envelope {
        data_queue: items,
        base_info,
    })?;
    let body = gzip(&json)?;
    debug!(
        items = items.len(),
        raw = json.len(),
        compressed = body.len(),
        "encoded envelope"
    );
    Ok(body)
}

/// HTTP transport posting gzip JSON to the DSN.
pub struct HttpTransport {
    client: reqwest::Client,
    dsn: String,
}

impl HttpTransport {
    pub fn new(dsn: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| SdkError::Transport(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            dsn: dsn.into(),
        })
    }

    fn request(&self, payload: Bytes) -> reqwest::RequestBuilder {
        self.client
            .post(&self.dsn)
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "gzip")
            .body(payload)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn send_beacon(&self, payload: &Bytes) -> bool {
        // Beacon delivery needs a live runtime to detach onto.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let request = self.request(payload.clone());
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                debug!(error = %e, "beacon delivery failed");
            }
        });
        true
    }

    async fn send(&self, payload: Bytes) -> Result<()> {
        let response = self
            .request(payload)
            .send()
            .await
            .map_err(|e| SdkError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SdkError::Transport(format!("status {status}")));
        }
        Ok(())
    }
}

/// Programmable in-memory transport for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Bytes>>,
    beacons: Mutex<Vec<Bytes>>,
    attempts: AtomicUsize,
    fail_remaining: AtomicUsize,
    beacon_available: AtomicBool,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` request/response sends fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Toggle beacon availability (off by default).
    pub fn set_beacon_available(&self, available: bool) {
        self.beacon_available.store(available, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn beacons(&self) -> Vec<Bytes> {
        self.beacons.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Request/response attempts, successes and failures included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Decompress and parse one captured payload.
    pub fn decode(payload: &Bytes) -> serde_json::Value {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(payload.as_ref());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).expect("gunzip payload");
        serde_json::from_slice(&json).expect("parse payload")
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    fn send_beacon(&self, payload: &Bytes) -> bool {
        if !self.beacon_available.load(Ordering::SeqCst) {
            return false;
        }
        self.beacons.lock().push(payload.clone());
        true
    }

    async fn send(&self, payload: Bytes) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SdkError::Transport("status 502".to_string()));
        }
        self.sent.lock().push(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReportPayload;
    use serde_json::json;

    fn base_info() -> BaseInfo {
        BaseInfo {
            app_name: "shop".to_string(),
            app_code: "shop-web".to_string(),
            app_version: "1.0.0".to_string(),
            user_uuid: Some("u-1".to_string()),
            sdk_version: "0.1.0".to_string(),
            session_id: "sess_1".to_string(),
            page_url: "https://app.example.com/".to_string(),
            send_time: 1_000,
        }
    }

    #[test]
    fn test_envelope_gzip_roundtrip() {
        let items = vec![ReportItem {
            id: "a".to_string(),
            payload: ReportPayload::Custom(json!({"k": "v"})),
            sub_type: "t".to_string(),
            timestamp_ms: 5,
            is_immediate: false,
            retry_count: 0,
        }];

        let body = encode_envelope(&items, &base_info()).unwrap();
        let decoded = MockTransport::decode(&body);
        assert_eq!(decoded["dataQueue"][0]["id"], "a");
        assert_eq!(decoded["baseInfo"]["sessionId"], "sess_1");
    }

    #[test]
    fn test_gzip_actually_compresses() {
        let data = "repetitive payload ".repeat(1_000);
        let body = gzip(data.as_bytes()).unwrap();
        assert!(body.len() < data.len() / 5);
    }

    #[tokio::test]
    async fn test_mock_transport_failures() {
        let transport = MockTransport::new();
        transport.fail_next(1);

        let err = transport.send(Bytes::from_static(b"x")).await;
        assert!(matches!(err, Err(SdkError::Transport(_))));

        transport.send(Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_mock_beacon_toggle() {
        let transport = MockTransport::new();
        let payload = Bytes::from_static(b"z");
        assert!(!transport.send_beacon(&payload));

        transport.set_beacon_available(true);
        assert!(transport.send_beacon(&payload));
        assert_eq!(transport.beacons().len(), 1);
    }
}
