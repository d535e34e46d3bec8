// src/lib.rs
//! Traceline: client-side telemetry SDK
//!
//! Observes a host application (network calls, console errors, navigation,
//! lifecycle events, clicks) and delivers what it sees to a collection
//! endpoint, batched, sampled, and resilient to connectivity loss.
//!
//! # Architecture
//!
//! - **host**: explicit host runtime model with replaceable API slots
//! - **interception**: reversible taps over the host's slots and events
//! - **bus**: synchronous event dispatch between taps and consumers
//! - **behavior**: bounded, age-limited behavior streams
//! - **pipeline**: queue, sampling, batching, retry, offline persistence,
//!   transport selection, and the click side channel
//! - **plugin / sdk**: plugin contract and the assembled instance
//! - **config**: everything the embedding application can tune
//! - **utils**: errors, ids, clock, pattern matching

pub mod behavior;
pub mod bus;
pub mod config;
pub mod host;
pub mod interception;
pub mod pipeline;
pub mod plugin;
pub mod sdk;
pub mod utils;

// Re-export commonly used types
pub use config::{BehaviorConfig, ClickConfig, SdkConfig};
pub use interception::TapKind;
pub use pipeline::ReportPayload;
pub use plugin::{BehaviorPlugin, Plugin};
pub use sdk::{Facade, Sdk};
pub use utils::errors::{Result, SdkError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
