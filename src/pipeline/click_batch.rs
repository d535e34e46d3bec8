// src/pipeline/click_batch.rs
//! Debounced click side channel
//!
//! Enriched click records bypass the report queue and travel on their own
//! channel: records accumulate until the buffer reaches `cache_max_length`
//! or `cache_waiting_time_ms` has passed since the first buffered record,
//! whichever comes first. A failed flush is logged and dropped; click
//! records are never retried or archived.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::transport::{gzip, Transport};
use crate::config::AfterSendClick;
use crate::interception::click::ClickRecord;

const CLICK_CHANNEL_CAPACITY: usize = 256;

/// Accumulates enriched click records and flushes them in batches.
pub struct ClickBatcher {
    tx: mpsc::Sender<ClickRecord>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ClickBatcher {
    /// Spawn the accumulator task. Must be called from within a runtime.
    pub fn new(
        cache_max_length: usize,
        cache_waiting_time_ms: u64,
        transport: Arc<dyn Transport>,
        after_send: Option<AfterSendClick>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CLICK_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(Self::run(
            rx,
            cancel.clone(),
            cache_max_length.max(1),
            cache_waiting_time_ms,
            transport,
            after_send,
        ));
        Self {
            tx,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Hand a record to the accumulator. Non-blocking; records are dropped
    /// when the channel is saturated.
    pub fn push(&self, record: ClickRecord) {
        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "click channel full, dropping record");
        }
    }

    /// Cancel the accumulator and wait for it to flush whatever is buffered.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "click accumulator task failed");
            }
        }
    }

    async fn run(
        mut rx: mpsc::Receiver<ClickRecord>,
        cancel: CancellationToken,
        max_len: usize,
        wait_ms: u64,
        transport: Arc<dyn Transport>,
        after_send: Option<AfterSendClick>,
    ) {
        let mut buffer: Vec<ClickRecord> = Vec::new();
        'accumulate: loop {
            // wait for the first record of a batch
            let first = tokio::select! {
                _ = cancel.cancelled() => break 'accumulate,
                record = rx.recv() => match record {
                    Some(record) => record,
                    None => break 'accumulate,
                },
            };
            buffer.push(first);

            // the debounce window is anchored at the first buffered record
            let deadline = tokio::time::sleep(Duration::from_millis(wait_ms));
            tokio::pin!(deadline);
            while buffer.len() < max_len {
                tokio::select! {
                    _ = cancel.cancelled() => break 'accumulate,
                    _ = &mut deadline => break,
                    record = rx.recv() => match record {
                        Some(record) => buffer.push(record),
                        None => break,
                    },
                }
            }

            Self::flush(&transport, &after_send, std::mem::take(&mut buffer)).await;
        }

        // drain anything still in flight on teardown
        while let Ok(record) = rx.try_recv() {
            buffer.push(record);
        }
        if !buffer.is_empty() {
            Self::flush(&transport, &after_send, buffer).await;
        }
    }

    async fn flush(
        transport: &Arc<dyn Transport>,
        after_send: &Option<AfterSendClick>,
        records: Vec<ClickRecord>,
    ) {
        let json = match serde_json::to_vec(&records) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "dropping unserializable click batch");
                return;
            }
        };
        let body = match gzip(&json) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "dropping click batch");
                return;
            }
        };
        match transport.send(body).await {
            Ok(()) => {
                debug!(records = records.len(), "click batch delivered");
                if let Some(hook) = after_send {
                    (hook.0)(&records);
                }
            }
            // click records are best-effort; a failed batch is not retried
            Err(e) => warn!(error = %e, records = records.len(), "click batch delivery failed"),
        }
    }
}
