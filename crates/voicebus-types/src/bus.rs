//! Message bus domain types.
//!
//! Defines the immutable `Message` envelope, delivery `Priority`, the typed
//! `Payload` carried by messages, and the point-in-time statistics snapshots
//! returned by the bus.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::voice::{AudioRequest, AudioResponse, StatusUpdate};

/// Free-form metadata attached to messages, requests and responses.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Ordinal urgency of a message. Higher priorities are dequeued first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Priority {
    /// Numeric level (1 = low .. 4 = urgent).
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// What a message carries.
///
/// Untyped JSON is accepted on any topic; the voice protocol converts it into
/// an [`AudioRequest`] at the moment it crosses into the protocol layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Json(serde_json::Value),
    AudioRequest(AudioRequest),
    AudioResponse(AudioResponse),
    Status(StatusUpdate),
}

impl Payload {
    /// Short name of the variant, matching its serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Json(_) => "json",
            Payload::AudioRequest(_) => "audio_request",
            Payload::AudioResponse(_) => "audio_response",
            Payload::Status(_) => "status",
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<AudioRequest> for Payload {
    fn from(request: AudioRequest) -> Self {
        Payload::AudioRequest(request)
    }
}

impl From<AudioResponse> for Payload {
    fn from(response: AudioResponse) -> Self {
        Payload::AudioResponse(response)
    }
}

impl From<StatusUpdate> for Payload {
    fn from(status: StatusUpdate) -> Self {
        Payload::Status(status)
    }
}

/// An immutable envelope published on a topic.
///
/// Once published the bus shares the message behind an `Arc`, so neither the
/// publisher nor any subscriber can mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// UUIDv7 message ID.
    pub id: Uuid,
    /// Topic the message was published on.
    pub topic: String,
    pub payload: Payload,
    /// When the message was constructed.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
}

impl Message {
    /// Build a message with a fresh id and timestamp.
    pub fn new(
        topic: impl Into<String>,
        payload: Payload,
        priority: Priority,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic: topic.into(),
            payload,
            created_at: Utc::now(),
            priority,
            metadata,
        }
    }
}

/// Point-in-time snapshot of bus-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub messages_published: u64,
    /// Successful subscriber invocations.
    pub messages_delivered: u64,
    /// Subscriber failures plus publishes rejected by a full queue.
    pub messages_failed: u64,
    pub topics_created: u64,
    pub active_topics: usize,
    pub queue_size: usize,
    pub running: bool,
}

/// Point-in-time snapshot of a single topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicStats {
    pub name: String,
    pub subscribers: usize,
    /// Total messages ever published on the topic (not capped by history).
    pub message_count: u64,
    pub history_size: usize,
    pub created_at: DateTime<Utc>,
}
