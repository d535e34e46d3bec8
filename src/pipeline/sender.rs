// src/pipeline/sender.rs
//! Delivery pipeline driver
//!
//! Owns the live queue and the delivery loop: sampling at ingestion, a
//! periodic scheduler, batch flushing with eager draining on success, and
//! retry/backoff with archival on exhaustion. Failed batches share one
//! backoff delay derived from the highest retry count in the batch, and at
//! most one retry timer is pending at a time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::offline::OfflineStore;
use super::queue::ReportQueue;
use super::transport::{encode_envelope, Transport, BEACON_MAX_BYTES};
use super::{BaseInfo, ReportItem, ReportPayload};
use crate::config::{AfterSendData, BeforeSendData, SdkConfig};
use crate::utils::{ids, Clock, Result, SdkError};

/// Pipeline counters.
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    /// Items accepted into the live queue
    pub queued: u64,

    /// Non-immediate items dropped by the sampling gate
    pub sampled_out: u64,

    /// Items vetoed by the before-send hook
    pub vetoed: u64,

    /// Items delivered
    pub sent_items: u64,

    /// Batches delivered
    pub sent_batches: u64,

    /// Batches that failed transport
    pub failed_batches: u64,

    /// Items archived after retry exhaustion
    pub archived_items: u64,
}

/// The delivery pipeline. One instance per SDK instance.
pub struct Sender {
    config: Arc<SdkConfig>,
    queue: ReportQueue,
    transport: Arc<dyn Transport>,
    store: Arc<dyn OfflineStore>,
    clock: Arc<dyn Clock>,
    page_url: Arc<RwLock<String>>,
    session_id: String,
    in_flight: AtomicUsize,
    retry_pending: AtomicBool,
    online: AtomicBool,
    restored: AtomicBool,
    notify: Arc<Notify>,
    scheduler: Mutex<Option<CancellationToken>>,
    stats: Mutex<SenderStats>,
}

impl Sender {
    pub fn new(
        config: Arc<SdkConfig>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn OfflineStore>,
        clock: Arc<dyn Clock>,
        page_url: Arc<RwLock<String>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: ReportQueue::new(config.max_queue_length),
            config,
            transport,
            store,
            clock,
            page_url,
            session_id: ids::session_id(),
            in_flight: AtomicUsize::new(0),
            retry_pending: AtomicBool::new(false),
            online: AtomicBool::new(true),
            restored: AtomicBool::new(false),
            notify: Arc::new(Notify::new()),
            scheduler: Mutex::new(None),
            stats: Mutex::new(SenderStats::default()),
        })
    }

    /// Restore any backlog persisted by a previous process. Runs at most
    /// once per pipeline lifetime; the online transition restores separately.
    pub async fn restore_offline(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.store.load_and_clear().await {
            Ok(items) if !items.is_empty() => {
                info!(count = items.len(), "restored persisted queue");
                self.queue.requeue_front(items);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "offline restore failed"),
        }
    }

    /// Start the periodic scheduler. Idempotent while running.
    pub fn start(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *scheduler = Some(token.clone());

        let weak = Arc::downgrade(self);
        let notify = Arc::clone(&self.notify);
        let period = Duration::from_millis(self.config.send_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = interval.tick() => {}
                    _ = notify.notified() => {}
                }
                let Some(sender) = weak.upgrade() else { return };
                // Skip the tick entirely when there is nothing to do or no
                // capacity to do it.
                if sender.queue.is_empty()
                    || sender.in_flight.load(Ordering::SeqCst)
                        >= sender.config.max_concurrent_requests
                {
                    continue;
                }
                // Advisory deferral: run the flush off the scheduler turn.
                tokio::spawn(async move { sender.flush().await });
            }
        });
    }

    /// Cancel the periodic scheduler. The live queue is untouched.
    pub fn stop(&self) {
        if let Some(token) = self.scheduler.lock().take() {
            token.cancel();
        }
    }

    /// Ingest one item. Non-immediate items pass the sampling gate first;
    /// immediate items bypass sampling, jump the queue head, and trigger an
    /// out-of-band flush. Returns whether the item was queued.
    pub fn send_data(
        self: &Arc<Self>,
        payload: ReportPayload,
        sub_type: impl Into<String>,
        is_immediate: bool,
    ) -> bool {
        if !is_immediate && rand::thread_rng().gen::<f64>() >= self.config.sample_rate {
            self.stats.lock().sampled_out += 1;
            return false;
        }

        let mut item = ReportItem {
            id: ids::new_id(),
            payload,
            sub_type: sub_type.into(),
            timestamp_ms: self.clock.now_ms(),
            is_immediate,
            retry_count: 0,
        };

        if let Some(BeforeSendData(hook)) = &self.config.before_send_data {
            match hook(item) {
                Some(transformed) => item = transformed,
                None => {
                    self.stats.lock().vetoed += 1;
                    return false;
                }
            }
        }

        if is_immediate {
            self.queue.push_front(item);
            self.notify.notify_one();
        } else {
            self.queue.push_back(item);
        }
        self.stats.lock().queued += 1;
        true
    }

    /// Flush batches from the queue head until it drains, a batch fails, or
    /// the concurrency bound is reached. Success drains eagerly; failure
    /// hands off to the retry path and stops.
    pub async fn flush(self: &Arc<Self>) {
        loop {
            if self.queue.is_empty() || !self.online.load(Ordering::SeqCst) {
                return;
            }
            let max = self.config.max_concurrent_requests;
            if self
                .in_flight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_err()
            {
                return;
            }

            let batch = self.queue.take_batch(self.config.batch_size);
            if batch.is_empty() {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return;
            }

            let result = self.deliver(&batch).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match result {
                Ok(()) => {
                    {
                        let mut stats = self.stats.lock();
                        stats.sent_batches += 1;
                        stats.sent_items += batch.len() as u64;
                    }
                    if let Some(AfterSendData(hook)) = &self.config.after_send_data {
                        hook(&batch);
                    }
                    if self.queue.is_empty() {
                        return;
                    }
                }
                Err(e) => {
                    self.handle_failure(batch, e).await;
                    return;
                }
            }
        }
    }

    async fn deliver(&self, batch: &[ReportItem]) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(SdkError::Offline);
        }
        let body = encode_envelope(batch, &self.base_info())?;
        if body.len() <= BEACON_MAX_BYTES && self.transport.send_beacon(&body) {
            debug!(items = batch.len(), bytes = body.len(), "batch sent via beacon");
            return Ok(());
        }
        self.transport.send(body).await
    }

    // Boxed rather than `async fn`: the retry task spawned below re-enters
    // `flush`, and the resulting opaque-future cycle cannot prove `Send`.
    fn handle_failure(
        self: &Arc<Self>,
        mut batch: Vec<ReportItem>,
        error: SdkError,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        warn!(error = %error, items = batch.len(), "batch delivery failed");
        self.stats.lock().failed_batches += 1;

        for item in &mut batch {
            item.retry_count += 1;
        }
        // Shared batch-level backoff: one delay from the batch's highest
        // retry count, deliberately not per-item.
        let max_retry_count = batch.iter().map(|i| i.retry_count).max().unwrap_or(1);

        let (retry, archive): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|item| item.retry_count <= self.config.max_retry);

        if !archive.is_empty() {
            info!(count = archive.len(), "retry exhausted, archiving items");
            self.stats.lock().archived_items += archive.len() as u64;
            if let Err(e) = self.store.append(&archive).await {
                warn!(error = %e, "archiving failed, items dropped");
            }
        }

        let has_retry = !retry.is_empty();
        if has_retry {
            self.queue.requeue_front(retry);
        }

        // Offline: suspend entirely; the online transition resumes delivery.
        if !self.online.load(Ordering::SeqCst) {
            return;
        }

        if has_retry && !self.retry_pending.swap(true, Ordering::SeqCst) {
            let delay = self.backoff_delay(max_retry_count);
            debug!(delay_ms = delay.as_millis() as u64, "retry scheduled");
            let sender = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                sender.retry_pending.store(false, Ordering::SeqCst);
                sender.flush().await;
            });
        }
        })
    }

    fn backoff_delay(&self, max_retry_count: u32) -> Duration {
        let exp = max_retry_count.saturating_sub(1).min(31);
        let base = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_max_ms);
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base / 5)
        };
        Duration::from_millis(base + jitter)
    }

    /// React to a connectivity transition. Going online restores the
    /// archived backlog, flushes immediately, and restarts the scheduler;
    /// going offline stops the scheduler but keeps the live queue.
    pub fn set_online(self: &Arc<Self>, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was == online {
            return;
        }
        if online {
            info!("network online, resuming delivery");
            let sender = Arc::clone(self);
            tokio::spawn(async move {
                match sender.store.load_and_clear().await {
                    Ok(items) if !items.is_empty() => sender.queue.requeue_front(items),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "offline restore failed"),
                }
                sender.flush().await;
            });
            self.start();
        } else {
            info!("network offline, suspending delivery");
            self.stop();
        }
    }

    /// Page-teardown flush: one synchronous best-effort beacon attempt, then
    /// persist whatever remains, overwriting prior stored content.
    pub fn final_flush(&self) {
        if !self.queue.is_empty() && self.online.load(Ordering::SeqCst) {
            let batch = self.queue.take_batch(self.config.batch_size);
            match encode_envelope(&batch, &self.base_info()) {
                Ok(body) if body.len() <= BEACON_MAX_BYTES && self.transport.send_beacon(&body) => {
                    let mut stats = self.stats.lock();
                    stats.sent_batches += 1;
                    stats.sent_items += batch.len() as u64;
                }
                Ok(_) => self.queue.requeue_front(batch),
                Err(e) => {
                    warn!(error = %e, "teardown encode failed");
                    self.queue.requeue_front(batch);
                }
            }
        }
        let remaining = self.queue.drain_all();
        if let Err(e) = self.store.persist(&remaining) {
            warn!(error = %e, "teardown persist failed");
        }
    }

    fn base_info(&self) -> BaseInfo {
        BaseInfo {
            app_name: self.config.app_name.clone(),
            app_code: self.config.app_code.clone(),
            app_version: self.config.app_version.clone(),
            user_uuid: self.config.user_uuid.clone(),
            sdk_version: crate::VERSION.to_string(),
            session_id: self.session_id.clone(),
            page_url: self.page_url.read().clone(),
            send_time: self.clock.now_ms(),
        }
    }

    pub fn stats(&self) -> SenderStats {
        self.stats.lock().clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if let Some(token) = self.scheduler.lock().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::offline::MemoryOfflineStore;
    use crate::pipeline::transport::MockTransport;
    use crate::utils::MockClock;
    use serde_json::json;

    fn make_sender(
        mutate: impl FnOnce(&mut SdkConfig),
    ) -> (Arc<Sender>, Arc<MockTransport>, Arc<MemoryOfflineStore>) {
        crate::utils::init_test_logging();
        let mut config = SdkConfig::new("https://collect.example.com/report");
        mutate(&mut config);
        let transport = MockTransport::new();
        let store = MemoryOfflineStore::new();
        let sender = Sender::new(
            Arc::new(config),
            transport.clone(),
            store.clone(),
            Arc::new(MockClock::new(1_000)),
            Arc::new(RwLock::new("https://app.example.com/".to_string())),
        );
        (sender, transport, store)
    }

    fn payload(tag: &str) -> ReportPayload {
        ReportPayload::Custom(json!({ "tag": tag }))
    }

    async fn wait_for(mut done: impl FnMut() -> bool) -> u64 {
        let started = tokio::time::Instant::now();
        for _ in 0..100_000 {
            if done() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(done(), "condition not reached");
        started.elapsed().as_millis() as u64
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_rate_one_queues_everything() {
        let (sender, _transport, _store) = make_sender(|c| c.sample_rate = 1.0);
        for i in 0..10 {
            assert!(sender.send_data(payload(&i.to_string()), "custom", false));
        }
        assert_eq!(sender.queue_len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_rate_zero_queues_only_immediate() {
        let (sender, _transport, _store) = make_sender(|c| c.sample_rate = 0.0);
        for i in 0..10 {
            assert!(!sender.send_data(payload(&i.to_string()), "custom", false));
        }
        assert!(sender.send_data(payload("urgent"), "custom", true));
        assert_eq!(sender.queue_len(), 1);
        assert_eq!(sender.stats().sampled_out, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_preempts_queued_normals() {
        let (sender, transport, _store) = make_sender(|c| c.batch_size = 10);
        sender.send_data(payload("n1"), "custom", false);
        sender.send_data(payload("n2"), "custom", false);
        sender.send_data(payload("n3"), "custom", false);
        sender.send_data(payload("urgent"), "custom", true);

        sender.flush().await;

        let batches = transport.sent();
        assert_eq!(batches.len(), 1);
        let decoded = MockTransport::decode(&batches[0]);
        assert_eq!(decoded["dataQueue"][0]["payload"]["tag"], "urgent");
        assert_eq!(decoded["dataQueue"][0]["isImmediate"], true);
        assert_eq!(decoded["dataQueue"][3]["payload"]["tag"], "n3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_drain_on_success() {
        let (sender, transport, _store) = make_sender(|c| c.batch_size = 2);
        for i in 0..5 {
            sender.send_data(payload(&i.to_string()), "custom", false);
        }

        sender.flush().await;

        assert_eq!(transport.sent_count(), 3); // 2 + 2 + 1
        assert_eq!(sender.queue_len(), 0);
        assert_eq!(sender.stats().sent_items, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_then_archive() {
        let (sender, transport, store) = make_sender(|c| {
            c.max_retry = 2;
            c.backoff_base_ms = 1_000;
            c.backoff_max_ms = 30_000;
        });
        transport.fail_next(3);
        sender.send_data(payload("doomed"), "custom", false);

        sender.flush().await;
        assert_eq!(transport.attempts(), 1);
        assert_eq!(sender.queue_len(), 1); // re-queued for retry

        // first retry at backoff_base * 2^0 plus up to 20% jitter
        let elapsed_first = wait_for(|| transport.attempts() >= 2).await;
        assert!(
            (1_000..=1_300).contains(&elapsed_first),
            "first retry at {elapsed_first}ms"
        );

        // second retry at backoff_base * 2^1 plus jitter, measured from the
        // second failure onward
        let gap = wait_for(|| transport.attempts() >= 3).await;
        assert!((2_000..=2_500).contains(&gap), "second retry after {gap}ms");

        // third failure exhausts max_retry = 2: archived, never retried
        wait_for(|| !store.stored().is_empty()).await;
        let archived = store.stored();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].retry_count, 3);
        assert_eq!(sender.queue_len(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempts(), 3);
        assert_eq!(sender.stats().archived_items, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_and_drains() {
        let (sender, transport, store) = make_sender(|c| c.max_retry = 3);
        transport.fail_next(1);
        sender.send_data(payload("flaky"), "custom", false);

        sender.flush().await;
        wait_for(|| transport.sent_count() == 1).await;

        assert!(store.stored().is_empty());
        assert_eq!(sender.queue_len(), 0);
        let decoded = MockTransport::decode(&transport.sent()[0]);
        assert_eq!(decoded["dataQueue"][0]["retryCount"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_suspends_and_online_resumes() {
        let (sender, transport, _store) = make_sender(|_| {});
        sender.send_data(payload("held"), "custom", false);

        sender.set_online(false);
        sender.flush().await;
        assert_eq!(transport.attempts(), 0);
        assert_eq!(sender.queue_len(), 1);

        sender.set_online(true);
        wait_for(|| transport.sent_count() == 1).await;
        assert_eq!(sender.queue_len(), 0);
        sender.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_restores_archived_backlog() {
        let (sender, transport, store) = make_sender(|_| {});
        store
            .append(&[ReportItem {
                id: "stale".to_string(),
                payload: payload("stale"),
                sub_type: "custom".to_string(),
                timestamp_ms: 1,
                is_immediate: false,
                retry_count: 3,
            }])
            .await
            .unwrap();

        sender.set_online(false);
        sender.set_online(true);
        wait_for(|| transport.sent_count() == 1).await;

        let decoded = MockTransport::decode(&transport.sent()[0]);
        assert_eq!(decoded["dataQueue"][0]["id"], "stale");
        assert!(store.stored().is_empty());
        sender.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_offline_runs_once() {
        let (sender, _transport, store) = make_sender(|_| {});
        store.persist(&[ReportItem {
            id: "persisted".to_string(),
            payload: payload("persisted"),
            sub_type: "custom".to_string(),
            timestamp_ms: 1,
            is_immediate: false,
            retry_count: 0,
        }])
        .unwrap();

        sender.restore_offline().await;
        sender.restore_offline().await;
        assert_eq!(sender.queue_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_flushes_periodically() {
        let (sender, transport, _store) = make_sender(|c| c.send_interval_ms = 1_000);
        sender.start();
        sender.send_data(payload("tick"), "custom", false);

        wait_for(|| transport.sent_count() == 1).await;
        sender.stop();

        // stopped scheduler no longer flushes
        sender.send_data(payload("after-stop"), "custom", false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_flush_beacon_and_persist() {
        let (sender, transport, store) = make_sender(|c| c.batch_size = 2);
        transport.set_beacon_available(true);
        for i in 0..3 {
            sender.send_data(payload(&i.to_string()), "custom", false);
        }

        sender.final_flush();

        assert_eq!(transport.beacons().len(), 1);
        assert_eq!(sender.queue_len(), 0);
        let persisted = store.stored();
        assert_eq!(persisted.len(), 1); // the item past batch_size
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_flush_without_beacon_persists_everything() {
        let (sender, transport, store) = make_sender(|_| {});
        sender.send_data(payload("a"), "custom", false);
        sender.send_data(payload("b"), "custom", false);

        sender.final_flush();

        assert_eq!(transport.attempts(), 0);
        assert_eq!(store.stored().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_before_send_hook_veto_and_transform() {
        let (sender, _transport, _store) = make_sender(|c| {
            c.before_send_data = Some(BeforeSendData(Arc::new(|mut item| {
                if item.sub_type == "secret" {
                    return None;
                }
                item.sub_type = format!("hooked:{}", item.sub_type);
                Some(item)
            })));
        });

        assert!(!sender.send_data(payload("drop"), "secret", false));
        assert!(sender.send_data(payload("keep"), "custom", false));
        assert_eq!(sender.queue_len(), 1);
        assert_eq!(sender.stats().vetoed, 1);

        let batch = sender.queue.take_batch(1);
        assert_eq!(batch[0].sub_type, "hooked:custom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_send_hook_sees_delivered_batch() {
        let delivered: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let (sender, _transport, _store) = make_sender(move |c| {
            c.after_send_data = Some(AfterSendData(Arc::new(move |batch| {
                sink.lock()
                    .extend(batch.iter().map(|item| item.id.clone()));
            })));
        });

        sender.send_data(payload("x"), "custom", false);
        sender.flush().await;
        assert_eq!(delivered.lock().len(), 1);
    }
}
