// src/config.rs
//! SDK configuration surface
//!
//! Everything the embedding application can tune: endpoint, app identity,
//! sampling, delivery pacing and retry policy, behavior-stream defaults,
//! click-capture policy, ignore lists, and the send hooks.
//!
//! Configuration is built programmatically by the host application; there is
//! no file loading. `validate()` runs once at `Sdk::init`.

use std::fmt;
use std::sync::Arc;

use crate::interception::click::ClickRecord;
use crate::interception::TapKind;
use crate::pipeline::ReportItem;
use crate::utils::{Result, SdkError};

/// Hook invoked before a report item is queued; may veto (None) or transform.
#[derive(Clone)]
pub struct BeforeSendData(pub Arc<dyn Fn(ReportItem) -> Option<ReportItem> + Send + Sync>);

/// Hook invoked after a batch of report items is delivered.
#[derive(Clone)]
pub struct AfterSendData(pub Arc<dyn Fn(&[ReportItem]) + Send + Sync>);

/// Hook invoked before an enriched click record is emitted; may veto or transform.
#[derive(Clone)]
pub struct BeforeSendClick(pub Arc<dyn Fn(ClickRecord) -> Option<ClickRecord> + Send + Sync>);

/// Hook invoked after a batch of enriched click records is delivered.
#[derive(Clone)]
pub struct AfterSendClick(pub Arc<dyn Fn(&[ClickRecord]) + Send + Sync>);

macro_rules! opaque_debug {
    ($ty:ty) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($ty), "(..)"))
            }
        }
    };
}

opaque_debug!(BeforeSendData);
opaque_debug!(AfterSendData);
opaque_debug!(BeforeSendClick);
opaque_debug!(AfterSendClick);

/// Click-capture configuration
#[derive(Debug, Clone)]
pub struct ClickConfig {
    /// Enable enriched click capture
    pub enabled: bool,

    /// Coalescing interval for repeated clicks (milliseconds)
    pub throttle_ms: u64,

    /// Selectors whose matching elements (and descendants) are never captured
    pub ignore_selectors: Vec<String>,

    /// Capture pointer coordinates
    pub capture_position: bool,

    /// Capture element tag/id/text into the record
    pub capture_element_info: bool,

    /// Truncate captured element text to this many characters
    pub max_element_text_length: usize,

    /// Extra attribute names to read off the marker element
    pub custom_attributes: Vec<String>,

    /// Veto/transform hook run per enriched record
    pub before_send: Option<BeforeSendClick>,

    /// Hook run after a click batch is delivered
    pub after_send: Option<AfterSendClick>,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_ms: 100,
            ignore_selectors: Vec::new(),
            capture_position: true,
            capture_element_info: true,
            max_element_text_length: 50,
            custom_attributes: Vec::new(),
            before_send: None,
            after_send: None,
        }
    }
}

/// Tap installation toggles
#[derive(Debug, Clone, Default)]
pub struct ListenerToggles {
    /// When set, only these taps are installed
    pub enabled: Option<Vec<TapKind>>,

    /// Taps that are never installed, even when listed in `enabled`
    pub disabled: Vec<TapKind>,
}

impl ListenerToggles {
    /// Returns true when `kind` should be installed under these toggles.
    pub fn allows(&self, kind: TapKind) -> bool {
        if self.disabled.contains(&kind) {
            return false;
        }
        match &self.enabled {
            Some(enabled) => enabled.contains(&kind),
            None => true,
        }
    }
}

/// Behavior-stream defaults and capture policy
#[derive(Debug, Clone)]
pub struct BehaviorConfig {
    /// Ring-buffer capacity of a stream
    pub max_size: usize,

    /// Events older than this are swept; <= 0 disables sweeping
    pub max_age_ms: i64,

    /// Sweep timer period (milliseconds)
    pub sweep_interval_ms: u64,

    /// Verbose stream diagnostics
    pub debug: bool,

    /// Click-capture policy
    pub click: ClickConfig,

    /// Tap installation toggles
    pub listeners: ListenerToggles,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_age_ms: 5 * 60 * 1000,
            sweep_interval_ms: 10_000,
            debug: false,
            click: ClickConfig::default(),
            listeners: ListenerToggles::default(),
        }
    }
}

/// Top-level SDK configuration
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Collection endpoint (required)
    pub dsn: String,

    /// Application name reported in the envelope
    pub app_name: String,

    /// Application code reported in the envelope
    pub app_code: String,

    /// Application version reported in the envelope
    pub app_version: String,

    /// Stable user identifier, when the host app has one
    pub user_uuid: Option<String>,

    /// Sampling rate for non-immediate items, in [0, 1]
    pub sample_rate: f64,

    /// Verbose SDK diagnostics
    pub debug: bool,

    /// Behavior capture configuration
    pub behavior: BehaviorConfig,

    /// Click side-channel: flush when this many records are buffered
    pub cache_max_length: usize,

    /// Click side-channel: debounce wait before flushing a partial buffer
    pub cache_waiting_time_ms: u64,

    /// Error messages matching any of these patterns are not captured
    pub ignore_errors: Vec<String>,

    /// Request URLs matching any of these patterns are not captured
    pub ignore_request: Vec<String>,

    /// Veto/transform hook run before queueing a report item
    pub before_send_data: Option<BeforeSendData>,

    /// Hook run after a batch is delivered
    pub after_send_data: Option<AfterSendData>,

    /// Transport timeout (milliseconds)
    pub timeout_ms: u64,

    /// Live-queue bound; oldest items are dropped past this
    pub max_queue_length: usize,

    /// Maximum items per flushed batch
    pub batch_size: usize,

    /// Scheduler tick period (milliseconds)
    pub send_interval_ms: u64,

    /// Bound on overlapping in-flight flushes
    pub max_concurrent_requests: usize,

    /// Retries per item before archival
    pub max_retry: u32,

    /// Exponential backoff base delay (milliseconds)
    pub backoff_base_ms: u64,

    /// Exponential backoff cap (milliseconds)
    pub backoff_max_ms: u64,

    /// Durable-storage key for the offline queue
    pub offline_storage_key: String,
}

impl SdkConfig {
    /// Create a configuration with defaults for everything but the endpoint.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration. Called once by `Sdk::init`.
    pub fn validate(&self) -> Result<()> {
        if self.dsn.trim().is_empty() {
            return Err(SdkError::Config("dsn is required".to_string()));
        }
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(SdkError::Config(format!(
                "sample_rate must be within [0, 1], got {}",
                self.sample_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(SdkError::Config("batch_size must be positive".to_string()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(SdkError::Config(
                "max_concurrent_requests must be positive".to_string(),
            ));
        }
        if self.max_queue_length == 0 {
            return Err(SdkError::Config(
                "max_queue_length must be positive".to_string(),
            ));
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(SdkError::Config(
                "backoff_base_ms must be positive and no greater than backoff_max_ms".to_string(),
            ));
        }
        if self.offline_storage_key.trim().is_empty() {
            return Err(SdkError::Config(
                "offline_storage_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            app_name: String::new(),
            app_code: String::new(),
            app_version: String::new(),
            user_uuid: None,
            sample_rate: 1.0,
            debug: false,
            behavior: BehaviorConfig::default(),
            cache_max_length: 10,
            cache_waiting_time_ms: 5_000,
            ignore_errors: Vec::new(),
            ignore_request: Vec::new(),
            before_send_data: None,
            after_send_data: None,
            timeout_ms: 10_000,
            max_queue_length: 200,
            batch_size: 10,
            send_interval_ms: 5_000,
            max_concurrent_requests: 3,
            max_retry: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            offline_storage_key: "traceline_offline_queue".to_string(),
        }
    }
}
