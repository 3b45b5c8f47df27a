//! Topic-based publish/subscribe bus with priority-ordered delivery.
//!
//! `PubSubService` owns the topic registry, one bounded priority queue of
//! pending deliveries, and a single background dispatch worker. Publishing is
//! synchronous and never waits for space or delivery; subscriber handlers run
//! sequentially on the worker, one message at a time.
//!
//! Handlers may re-enter the bus (e.g. publish from inside a callback): no
//! lock is held while user code runs.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use voicebus_types::bus::{BusStats, Message, Metadata, Payload, Priority, TopicStats};
use voicebus_types::config::BusConfig;
use voicebus_types::error::BusError;

use super::handler::HandlerRef;
use super::queue::DeliveryQueue;
use super::topic::Topic;

/// Monotonic bus-wide counters.
#[derive(Default)]
struct BusCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    topics_created: AtomicU64,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct BusInner {
    topics: DashMap<String, Arc<Topic>>,
    queue: DeliveryQueue,
    counters: BusCounters,
    config: BusConfig,
    worker: Mutex<Option<Worker>>,
    /// Worker stopped without waiting; may still be finishing a delivery.
    retiring: Mutex<Option<JoinHandle<()>>>,
}

/// In-process message bus.
///
/// Cloning is cheap and every clone refers to the same bus. Construct one
/// explicitly and pass it to every component that needs it; there is no
/// global instance.
#[derive(Clone)]
pub struct PubSubService {
    inner: Arc<BusInner>,
}

impl PubSubService {
    /// Create a bus with default settings.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                queue: DeliveryQueue::new(config.max_queue_size),
                counters: BusCounters::default(),
                config,
                worker: Mutex::new(None),
                retiring: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Topic management
    // ------------------------------------------------------------------

    /// Return the named topic, creating it on first use.
    pub fn create_topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.inner.topics.get(name) {
            return Arc::clone(topic.value());
        }
        match self.inner.topics.entry(name.to_string()) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                let topic = Arc::new(Topic::with_history_capacity(
                    name,
                    self.inner.config.history_capacity,
                ));
                slot.insert(Arc::clone(&topic));
                self.inner
                    .counters
                    .topics_created
                    .fetch_add(1, Ordering::Relaxed);
                debug!(topic = %name, "created topic");
                topic
            }
        }
    }

    pub fn get_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.inner.topics.get(name).map(|t| Arc::clone(t.value()))
    }

    /// Remove a topic together with its subscribers and history.
    ///
    /// Messages for the topic that are still queued are discarded at delivery.
    pub fn delete_topic(&self, name: &str) -> bool {
        let removed = self.inner.topics.remove(name).is_some();
        if removed {
            debug!(topic = %name, "deleted topic");
        }
        removed
    }

    /// All topic names, sorted.
    pub fn list_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe a handler to a topic, creating the topic if needed.
    ///
    /// Returns `false` if this exact handler is already subscribed there.
    pub fn subscribe(&self, topic: &str, handler: HandlerRef) -> bool {
        let added = self.create_topic(topic).add_subscriber(handler);
        if added {
            debug!(topic = %topic, "subscriber added");
        }
        added
    }

    /// Returns `false` if the topic or the handler is unknown.
    pub fn unsubscribe(&self, topic: &str, handler: &HandlerRef) -> bool {
        match self.get_topic(topic) {
            Some(t) => t.remove_subscriber(handler),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Publish a message and return its id.
    ///
    /// The message is recorded in the topic history and queued for delivery.
    /// Fails with [`BusError::QueueFull`] when the delivery queue is at
    /// capacity; this never blocks.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        priority: Priority,
        metadata: Metadata,
    ) -> Result<Uuid, BusError> {
        let topic_ref = self.create_topic(topic);
        let message = Arc::new(Message::new(topic, payload.into(), priority, metadata));
        let message_id = message.id;

        topic_ref.add_to_history(Arc::clone(&message));

        if self.inner.queue.push(message).is_err() {
            self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(topic = %topic, %message_id, "delivery queue full, publish rejected");
            return Err(BusError::QueueFull {
                topic: topic.to_string(),
                capacity: self.inner.queue.capacity(),
            });
        }

        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        trace!(topic = %topic, %message_id, %priority, "message queued");
        Ok(message_id)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    fn worker_slot(&self) -> MutexGuard<'_, Option<Worker>> {
        self.inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn retiring_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .retiring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the dispatch worker on the current tokio runtime. No-op if running.
    ///
    /// If a previous worker was stopped without waiting, the new one holds off
    /// until it has exited, so deliveries never overlap.
    pub fn start(&self) {
        let mut slot = self.worker_slot();
        if slot.is_some() {
            return;
        }
        let previous = self.retiring_slot().take();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            Arc::downgrade(&self.inner),
            previous,
            cancel.clone(),
            self.inner.config.poll_interval(),
        ));
        *slot = Some(Worker { cancel, handle });
        debug!("bus started");
    }

    /// Stop the dispatch worker. No-op if not running.
    ///
    /// The worker finishes its current delivery and exits. Messages still
    /// queued are dropped. With `wait`, this returns once the worker has
    /// exited or `timeout` has elapsed. Do not call with `wait` from inside a
    /// handler: the worker would be waiting on itself.
    pub async fn stop(&self, wait: bool, timeout: Duration) {
        let Some(worker) = self.worker_slot().take() else {
            return;
        };
        worker.cancel.cancel();

        let dropped = self.inner.queue.clear();
        if dropped > 0 {
            warn!(dropped, "discarding undelivered messages on shutdown");
        }

        if !wait {
            *self.retiring_slot() = Some(worker.handle);
            return;
        }
        match tokio::time::timeout(timeout, worker.handle).await {
            Ok(Ok(())) => debug!("bus stopped"),
            Ok(Err(e)) => warn!(error = %e, "dispatch worker ended abnormally"),
            Err(_) => warn!(?timeout, "dispatch worker did not stop in time"),
        }
    }

    /// Stop and wait using the configured stop timeout.
    pub async fn shutdown(&self) {
        self.stop(true, self.inner.config.stop_timeout()).await;
    }

    pub fn is_running(&self) -> bool {
        self.worker_slot().is_some()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn get_stats(&self) -> BusStats {
        let c = &self.inner.counters;
        BusStats {
            messages_published: c.published.load(Ordering::Relaxed),
            messages_delivered: c.delivered.load(Ordering::Relaxed),
            messages_failed: c.failed.load(Ordering::Relaxed),
            topics_created: c.topics_created.load(Ordering::Relaxed),
            active_topics: self.inner.topics.len(),
            queue_size: self.inner.queue.len(),
            running: self.is_running(),
        }
    }

    pub fn get_topic_stats(&self, name: &str) -> Option<TopicStats> {
        self.get_topic(name).map(|t| t.stats())
    }

    pub fn clear_topic_history(&self, name: &str) -> bool {
        match self.get_topic(name) {
            Some(t) => {
                t.clear_history();
                true
            }
            None => false,
        }
    }

    /// Retained messages for a topic, oldest first.
    pub fn topic_history(&self, name: &str) -> Option<Vec<Arc<Message>>> {
        self.get_topic(name).map(|t| t.history())
    }
}

impl Default for PubSubService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PubSubService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubService")
            .field("topics", &self.inner.topics.len())
            .field("queue", &self.inner.queue)
            .field("running", &self.is_running())
            .finish()
    }
}

impl BusInner {
    /// Deliver one message to a snapshot of its topic's subscribers.
    async fn deliver(&self, message: Arc<Message>) {
        let Some(topic) = self.topics.get(&message.topic).map(|t| Arc::clone(t.value())) else {
            debug!(topic = %message.topic, message_id = %message.id, "topic gone, message discarded");
            return;
        };

        for handler in topic.subscribers() {
            let outcome = AssertUnwindSafe(handler.handle_boxed(Arc::clone(&message)))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(error)) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = %message.topic,
                        message_id = %message.id,
                        error = %error,
                        "error delivering message to subscriber"
                    );
                }
                Err(panic) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = %message.topic,
                        message_id = %message.id,
                        panic = panic_message(panic.as_ref()),
                        "subscriber panicked"
                    );
                }
            }
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

/// Dispatch loop. Holds only a weak reference so dropping every bus handle
/// also ends the worker.
async fn run_worker(
    bus: Weak<BusInner>,
    previous: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    poll_interval: Duration,
) {
    if let Some(previous) = previous {
        // Already cancelled; it exits after its in-flight delivery
        let _ = previous.await;
    }
    debug!("dispatch worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(inner) = bus.upgrade() else {
            break;
        };
        match inner.queue.pop() {
            Some(message) => inner.deliver(message).await,
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = inner.queue.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!("dispatch worker exited");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler::handler_fn;
    use serde_json::json;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    fn text(message: &Message) -> String {
        match &message.payload {
            Payload::Json(v) => v["text"].as_str().unwrap_or_default().to_string(),
            other => other.kind().to_string(),
        }
    }

    /// A handler that forwards each message's `text` field into a channel.
    fn recorder() -> (HandlerRef, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let h = handler_fn(move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(text(&msg));
                Ok(())
            }
        });
        (h, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn higher_priority_is_delivered_first() {
        let bus = PubSubService::new();
        let (h, mut rx) = recorder();
        bus.subscribe("speech", h);

        bus.publish("speech", json!({"text": "hi"}), Priority::High, Metadata::new())
            .unwrap();
        bus.publish("speech", json!({"text": "lo"}), Priority::Low, Metadata::new())
            .unwrap();
        // Published second, but outranks both
        bus.publish("speech", json!({"text": "now"}), Priority::Urgent, Metadata::new())
            .unwrap();

        bus.start();
        assert_eq!(next(&mut rx).await, "now");
        assert_eq!(next(&mut rx).await, "hi");
        assert_eq!(next(&mut rx).await, "lo");
        bus.stop(true, WAIT).await;
    }

    #[tokio::test]
    async fn equal_priority_is_delivered_in_publish_order() {
        let bus = PubSubService::new();
        let (h, mut rx) = recorder();
        bus.subscribe("t", h);

        for n in 0..20 {
            bus.publish("t", json!({"text": n.to_string()}), Priority::Normal, Metadata::new())
                .unwrap();
        }
        bus.start();
        for n in 0..20 {
            assert_eq!(next(&mut rx).await, n.to_string());
        }
        bus.stop(true, WAIT).await;
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_the_rest() {
        let bus = PubSubService::new();
        let (first, mut rx_first) = recorder();
        let (last, mut rx_last) = recorder();
        let erroring = handler_fn(|_msg| async { anyhow::bail!("subscriber exploded") });
        let panicking = handler_fn(|_msg| async { panic!("subscriber panicked hard") });

        bus.subscribe("t", first);
        bus.subscribe("t", erroring);
        bus.subscribe("t", panicking);
        bus.subscribe("t", last);
        bus.start();

        bus.publish("t", json!({"text": "x"}), Priority::Normal, Metadata::new())
            .unwrap();
        assert_eq!(next(&mut rx_first).await, "x");
        assert_eq!(next(&mut rx_last).await, "x");
        bus.stop(true, WAIT).await;

        let stats = bus.get_stats();
        assert_eq!(stats.messages_published, 1);
        assert_eq!(stats.messages_delivered, 2);
        assert_eq!(stats.messages_failed, 2);
    }

    #[tokio::test]
    async fn full_queue_rejects_publish_synchronously() {
        let bus = PubSubService::with_config(BusConfig {
            max_queue_size: 2,
            ..BusConfig::default()
        });
        bus.publish("t", json!({}), Priority::Normal, Metadata::new()).unwrap();
        bus.publish("t", json!({}), Priority::Normal, Metadata::new()).unwrap();

        let err = bus
            .publish("t", json!({}), Priority::Urgent, Metadata::new())
            .unwrap_err();
        assert!(matches!(err, BusError::QueueFull { capacity: 2, .. }));

        let stats = bus.get_stats();
        assert_eq!(stats.messages_published, 2);
        assert_eq!(stats.messages_failed, 1);
        assert_eq!(stats.queue_size, 2);
    }

    #[tokio::test]
    async fn subscribe_dedupes_and_unsubscribe_reports_unknowns() {
        let bus = PubSubService::new();
        let (h, _rx) = recorder();
        let (stranger, _rx2) = recorder();

        assert!(bus.subscribe("t", h.clone()));
        assert!(!bus.subscribe("t", h.clone()));
        assert_eq!(bus.get_topic_stats("t").unwrap().subscribers, 1);

        assert!(!bus.unsubscribe("t", &stranger));
        assert!(!bus.unsubscribe("missing", &h));
        assert!(bus.unsubscribe("t", &h));
        assert!(!bus.unsubscribe("t", &h));
    }

    #[tokio::test]
    async fn create_topic_is_idempotent() {
        let bus = PubSubService::new();
        let a = bus.create_topic("t");
        let b = bus.create_topic("t");
        assert!(Arc::ptr_eq(&a, &b));

        bus.publish("t", json!({}), Priority::Normal, Metadata::new()).unwrap();
        bus.publish("other", json!({}), Priority::Normal, Metadata::new()).unwrap();

        let stats = bus.get_stats();
        assert_eq!(stats.topics_created, 2);
        assert_eq!(stats.active_topics, 2);
        assert_eq!(bus.list_topics(), vec!["other".to_string(), "t".to_string()]);
    }

    #[tokio::test]
    async fn unknown_topic_queries_return_sentinels() {
        let bus = PubSubService::new();
        assert!(bus.get_topic_stats("nope").is_none());
        assert!(bus.topic_history("nope").is_none());
        assert!(!bus.clear_topic_history("nope"));
        assert!(!bus.delete_topic("nope"));
    }

    #[tokio::test]
    async fn history_tracks_published_messages() {
        let bus = PubSubService::new();
        for n in 0..120 {
            bus.publish("t", json!({"text": n.to_string()}), Priority::Low, Metadata::new())
                .unwrap();
        }
        let stats = bus.get_topic_stats("t").unwrap();
        assert_eq!(stats.history_size, 100);
        assert_eq!(stats.message_count, 120);

        assert!(bus.clear_topic_history("t"));
        let stats = bus.get_topic_stats("t").unwrap();
        assert_eq!(stats.history_size, 0);
        assert_eq!(stats.message_count, 120);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let bus = PubSubService::new();
        assert!(!bus.get_stats().running);

        bus.start();
        bus.start();
        assert!(bus.get_stats().running);

        bus.stop(true, WAIT).await;
        bus.stop(true, WAIT).await;
        assert!(!bus.get_stats().running);
    }

    #[tokio::test]
    async fn restart_waits_for_the_previous_worker() {
        use std::sync::atomic::AtomicUsize;
        use tokio::sync::Semaphore;

        let bus = PubSubService::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<String>();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();

        let h = {
            let (in_flight, peak, gate) = (in_flight.clone(), peak.clone(), gate.clone());
            handler_fn(move |msg: Arc<Message>| {
                let (in_flight, peak, gate) = (in_flight.clone(), peak.clone(), gate.clone());
                let (started_tx, done_tx) = (started_tx.clone(), done_tx.clone());
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let _ = started_tx.send(text(&msg));
                    let _permit = gate.acquire().await?;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = done_tx.send(text(&msg));
                    Ok(())
                }
            })
        };
        bus.subscribe("t", h);
        bus.start();

        bus.publish("t", json!({"text": "first"}), Priority::Normal, Metadata::new())
            .unwrap();
        assert_eq!(next(&mut started_rx).await, "first");

        // Old worker is still blocked inside "first"
        bus.stop(false, WAIT).await;
        bus.start();
        bus.publish("t", json!({"text": "second"}), Priority::Normal, Metadata::new())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started_rx.try_recv().is_err());

        gate.add_permits(2);
        assert_eq!(next(&mut done_rx).await, "first");
        assert_eq!(next(&mut started_rx).await, "second");
        assert_eq!(next(&mut done_rx).await, "second");
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        bus.stop(true, WAIT).await;
    }

    #[tokio::test]
    async fn stop_discards_queued_messages() {
        let bus = PubSubService::new();
        let (h, mut rx) = recorder();
        bus.subscribe("t", h);
        bus.start();
        bus.stop(true, WAIT).await;

        bus.publish("t", json!({"text": "late"}), Priority::Normal, Metadata::new())
            .unwrap();
        assert_eq!(bus.get_stats().queue_size, 1);

        // Restarting after a stop works, but a second stop drops what is pending
        bus.start();
        assert_eq!(next(&mut rx).await, "late");
        bus.stop(true, WAIT).await;

        bus.publish("t", json!({"text": "dropped"}), Priority::Normal, Metadata::new())
            .unwrap();
        bus.start();
        bus.stop(true, WAIT).await;
        assert_eq!(bus.get_stats().queue_size, 0);
    }

    #[tokio::test]
    async fn handler_can_publish_back_into_the_bus() {
        let bus = PubSubService::new();
        let (h, mut rx) = recorder();
        bus.subscribe("pong", h);

        let relay_bus = bus.clone();
        let relay = handler_fn(move |msg| {
            let bus = relay_bus.clone();
            async move {
                bus.publish("pong", json!({"text": text(&msg)}), Priority::Normal, Metadata::new())?;
                Ok(())
            }
        });
        bus.subscribe("ping", relay);
        bus.start();

        bus.publish("ping", json!({"text": "echo"}), Priority::Normal, Metadata::new())
            .unwrap();
        assert_eq!(next(&mut rx).await, "echo");
        bus.stop(true, WAIT).await;
    }

    #[tokio::test]
    async fn deleted_topic_messages_are_discarded() {
        let bus = PubSubService::new();
        let (h, mut rx) = recorder();
        bus.subscribe("t", h);
        bus.publish("t", json!({"text": "gone"}), Priority::Normal, Metadata::new())
            .unwrap();
        assert!(bus.delete_topic("t"));

        bus.start();
        let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(got.is_err(), "message for a deleted topic was delivered");
        bus.stop(true, WAIT).await;
    }

    #[test]
    fn debug_impl() {
        let bus = PubSubService::new();
        let debug = format!("{bus:?}");
        assert!(debug.contains("PubSubService"));
        assert!(debug.contains("running"));
    }
}
