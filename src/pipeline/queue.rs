// src/pipeline/queue.rs
//! Live report-item queue
//!
//! Normal items are FIFO; immediate items are inserted at the head so they
//! precede every older normal item. The queue is bounded: past
//! `max_len` the oldest items are dropped (bounded resource usage is accepted
//! over lossless capture).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use super::ReportItem;

/// Bounded deque holding items awaiting delivery.
pub struct ReportQueue {
    items: Mutex<VecDeque<ReportItem>>,
    max_len: usize,
    overflow_dropped: AtomicU64,
}

impl ReportQueue {
    pub fn new(max_len: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_len,
            overflow_dropped: AtomicU64::new(0),
        }
    }

    /// Append a normal item, dropping the oldest item when full.
    pub fn push_back(&self, item: ReportItem) {
        let mut items = self.items.lock();
        if items.len() >= self.max_len {
            items.pop_front();
            let dropped = self.overflow_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, "live queue full, dropping oldest item");
        }
        items.push_back(item);
    }

    /// Insert an immediate item at the head. When full, the newest queued
    /// item yields instead of the head (which may itself be immediate).
    pub fn push_front(&self, item: ReportItem) {
        let mut items = self.items.lock();
        if items.len() >= self.max_len {
            items.pop_back();
            let dropped = self.overflow_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, "live queue full, dropping newest item");
        }
        items.push_front(item);
    }

    /// Re-insert a batch at the head, preserving the batch's relative order.
    /// Used for retry re-queues and offline restores; never drops.
    pub fn requeue_front(&self, batch: Vec<ReportItem>) {
        let mut items = self.items.lock();
        for item in batch.into_iter().rev() {
            items.push_front(item);
        }
    }

    /// Take up to `n` items from the head.
    pub fn take_batch(&self, n: usize) -> Vec<ReportItem> {
        let mut items = self.items.lock();
        let count = n.min(items.len());
        items.drain(..count).collect()
    }

    /// Remove and return everything, oldest first.
    pub fn drain_all(&self) -> Vec<ReportItem> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped.load(Ordering::Relaxed)
    }
}
