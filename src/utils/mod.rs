// src/utils/mod.rs
//! Common utilities and helpers
//!
//! - **Errors**: crate-wide error type and `Result` alias
//! - **Ids**: ULID-based identifier generation
//! - **Clock**: injectable time source (system + mock)
//! - **Patterns**: ignore-list matching for errors and request URLs

pub mod clock;
pub mod errors;
pub mod ids;
pub mod patterns;

pub use clock::{Clock, MockClock, SystemClock};
pub use errors::{Result, SdkError};

/// Prefix carried by the SDK's own console diagnostics so the console tap
/// can exclude them from capture.
pub const SDK_LOG_PREFIX: &str = "[traceline]";

/// Route tracing output to the test harness; honors `RUST_LOG`.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
