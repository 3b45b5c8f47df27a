//! A named mailbox: subscriber list plus bounded message history.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use voicebus_types::bus::{Message, TopicStats};

use super::handler::{same_handler, HandlerRef};

/// Default number of messages retained per topic.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// A single topic owned by the bus registry.
///
/// Subscribers and history live behind a per-topic lock, so operations on
/// different topics never contend with each other.
pub struct Topic {
    name: String,
    created_at: DateTime<Utc>,
    history_capacity: usize,
    state: Mutex<TopicState>,
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<HandlerRef>,
    history: VecDeque<Arc<Message>>,
    /// Monotonic; unaffected by history eviction or clearing.
    message_count: u64,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_history_capacity(name, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(name: impl Into<String>, history_capacity: usize) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            history_capacity,
            state: Mutex::new(TopicState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // A panicking subscriber never runs under this lock, but recover the
    // guard anyway rather than poisoning the topic forever.
    fn lock(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a subscriber. Returns `false` if this exact handler is already subscribed.
    pub fn add_subscriber(&self, handler: HandlerRef) -> bool {
        let mut state = self.lock();
        if state.subscribers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        state.subscribers.push(handler);
        true
    }

    /// Remove a subscriber. Returns `false` if it was not subscribed.
    pub fn remove_subscriber(&self, handler: &HandlerRef) -> bool {
        let mut state = self.lock();
        match state.subscribers.iter().position(|h| same_handler(h, handler)) {
            Some(idx) => {
                state.subscribers.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Copy of the current subscriber list, in subscription order.
    ///
    /// Delivery runs against this snapshot so concurrent (un)subscribes never
    /// observe or produce a half-updated list.
    pub fn subscribers(&self) -> Vec<HandlerRef> {
        self.lock().subscribers.clone()
    }

    /// Record a message, evicting the oldest entry once capacity is exceeded.
    pub fn add_to_history(&self, message: Arc<Message>) {
        let mut state = self.lock();
        state.history.push_back(message);
        state.message_count += 1;
        while state.history.len() > self.history_capacity {
            state.history.pop_front();
        }
    }

    /// Snapshot of retained messages, oldest first.
    pub fn history(&self) -> Vec<Arc<Message>> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    pub fn message_count(&self) -> u64 {
        self.lock().message_count
    }

    pub fn stats(&self) -> TopicStats {
        let state = self.lock();
        TopicStats {
            name: self.name.clone(),
            subscribers: state.subscribers.len(),
            message_count: state.message_count,
            history_size: state.history.len(),
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("subscribers", &state.subscribers.len())
            .field("history", &state.history.len())
            .field("message_count", &state.message_count)
            .finish()
    }
}
