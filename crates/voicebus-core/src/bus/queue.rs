//! Bounded priority queue of pending deliveries.
//!
//! Entries are ordered by priority (highest first), then enqueue time, then a
//! monotonic sequence number allocated under the same lock as the push. The
//! sequence makes the ordering key a strict total order, so equal-priority
//! messages are always delivered first-in-first-out.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::Notify;
use voicebus_types::bus::{Message, Priority};

/// A pending delivery.
#[derive(Debug)]
struct QueueEntry {
    priority: Priority,
    enqueued_at: Instant,
    seq: u64,
    message: Arc<Message>,
}

impl Ord for QueueEntry {
    // BinaryHeap is a max-heap: "greater" means "deliver sooner".
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

/// Bounded, thread-safe priority queue with a wake-up signal for the worker.
pub struct DeliveryQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue without blocking. Hands the message back if the queue is full.
    pub fn push(&self, message: Arc<Message>) -> Result<(), Arc<Message>> {
        {
            let mut state = self.lock();
            if state.heap.len() >= self.capacity {
                return Err(message);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueueEntry {
                priority: message.priority,
                enqueued_at: Instant::now(),
                seq,
                message,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Remove the next message to deliver, if any.
    pub fn pop(&self) -> Option<Arc<Message>> {
        self.lock().heap.pop().map(|entry| entry.message)
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything still pending. Returns how many messages were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.heap.len();
        state.heap.clear();
        dropped
    }

    /// Wait until a push happens (or a permit from an earlier push is pending).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use voicebus_types::bus::{Metadata, Payload};

    fn msg(label: &str, priority: Priority) -> Arc<Message> {
        Arc::new(Message::new(
            "t",
            json!({ "label": label }).into(),
            priority,
            Metadata::new(),
        ))
    }

    fn label(message: &Message) -> String {
        match &message.payload {
            Payload::Json(v) => v["label"].as_str().unwrap_or_default().to_string(),
            _ => String::new(),
        }
    }

    #[test]
    fn higher_priority_pops_first() {
        let queue = DeliveryQueue::new(10);
        queue.push(msg("low", Priority::Low)).unwrap();
        queue.push(msg("normal", Priority::Normal)).unwrap();
        queue.push(msg("urgent", Priority::Urgent)).unwrap();
        queue.push(msg("high", Priority::High)).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|m| label(&m))
            .collect();
        assert_eq!(order, vec!["urgent", "high", "normal", "low"]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let queue = DeliveryQueue::new(100);
        for n in 0..50 {
            queue.push(msg(&n.to_string(), Priority::Normal)).unwrap();
        }
        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|m| label(&m))
            .collect();
        let expected: Vec<String> = (0..50).map(|n| n.to_string()).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let queue = DeliveryQueue::new(2);
        queue.push(msg("a", Priority::Normal)).unwrap();
        queue.push(msg("b", Priority::Normal)).unwrap();

        let rejected = queue.push(msg("c", Priority::Urgent)).unwrap_err();
        assert_eq!(label(&rejected), "c");
        assert_eq!(queue.len(), 2);

        queue.pop();
        assert!(queue.push(msg("d", Priority::Normal)).is_ok());
    }

    #[test]
    fn clear_reports_dropped_count() {
        let queue = DeliveryQueue::new(10);
        queue.push(msg("a", Priority::Normal)).unwrap();
        queue.push(msg("b", Priority::Low)).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn push_wakes_a_waiter() {
        let queue = Arc::new(DeliveryQueue::new(10));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.notified().await;
                queue.pop()
            })
        };

        queue.push(msg("wake", Priority::Normal)).unwrap();
        let popped = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();
        assert_eq!(label(&popped.unwrap()), "wake");
    }
}
