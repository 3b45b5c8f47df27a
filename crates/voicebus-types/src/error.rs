use std::time::Duration;

use thiserror::Error;

/// Errors returned synchronously by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The delivery queue is at capacity; the publish was rejected.
    #[error("message queue is full ({capacity} pending), cannot publish to '{topic}'")]
    QueueFull { topic: String, capacity: usize },

    /// A publisher had neither a call-site topic nor a default topic.
    #[error("topic must be specified")]
    NoTopic,
}

/// Errors raised by an audio processor.
///
/// The processor chain contains these per processor and moves on to the next.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor failed: {0}")]
    Failed(String),

    #[error("processor timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the voice request/response protocol.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// A payload on the request topic could not be turned into an audio request.
    #[error("invalid request payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Bus(#[from] BusError),

    /// No terminal response arrived before the caller's deadline.
    #[error("no response for request {request_id} within {timeout:?}")]
    Timeout {
        request_id: uuid::Uuid,
        timeout: Duration,
    },

    /// The protocol was shut down while a caller was waiting.
    #[error("response channel closed for request {0}")]
    ResponseDropped(uuid::Uuid),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}
