// src/utils/clock.rs
//! Injectable wall-clock time source
//!
//! Timestamps on report items and behavior events, and the age math of the
//! stream sweep, all go through `Clock` so tests can run under mock time
//! without touching real wall clocks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Wall-clock time source (epoch milliseconds)
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// System clock backed by chrono
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Manually advanced clock for tests
#[derive(Debug, Default)]
pub struct MockClock {
    now_ms: AtomicU64,
}

impl MockClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
