// src/utils/errors.rs
//! Crate-wide error type
//!
//! Expected conditions (sampling drops, filter rejections, offline suspension)
//! are represented as return values at the call sites, not as errors. This enum
//! covers the failures that must propagate: bad configuration, transport and
//! storage failures, and contained plugin/handler faults.

use thiserror::Error;

/// SDK error type
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("network offline")]
    Offline,

    #[error("offline storage failed: {0}")]
    Storage(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("plugin install failed: {0}")]
    PluginInstall(String),

    #[error("event handler failed: {0}")]
    Handler(String),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SdkError>;
