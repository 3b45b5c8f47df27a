//! Voice request/response protocol types.
//!
//! An `AudioRequest` is published on [`TOPIC_REQUEST`]; exactly one terminal
//! `AudioResponse` with the same `request_id` is published on
//! [`TOPIC_RESPONSE`]; zero or more `StatusUpdate`s go to [`TOPIC_STATUS`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::bus::{Metadata, Payload};
use crate::error::VoiceError;

/// Topic carrying audio generation requests.
pub const TOPIC_REQUEST: &str = "voice.request";

/// Topic carrying terminal responses (one per request).
pub const TOPIC_RESPONSE: &str = "voice.response";

/// Topic carrying informational status updates.
pub const TOPIC_STATUS: &str = "voice.status";

/// Style used when a request does not name one.
pub const DEFAULT_STYLE: &str = "en_default";

/// Error carried by the terminal response when the processor chain is exhausted.
pub const NO_PROCESSOR_ERROR: &str = "No processor available or all processors failed";

fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

// An explicit `null` in a request mapping means "use the default".

fn style_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_style))
}

fn metadata_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<Metadata, D::Error> {
    Ok(Option::<Metadata>::deserialize(d)?.unwrap_or_default())
}

fn request_id_or_new<'de, D: Deserializer<'de>>(d: D) -> Result<Uuid, D::Error> {
    Ok(Option::<Uuid>::deserialize(d)?.unwrap_or_else(Uuid::now_v7))
}

/// A request for synthesized audio.
///
/// Deserializing from a mapping that omits `request_id` (or sets it to null)
/// generates a fresh id, matching what [`AudioRequest::new`] does. Null
/// `style` and `metadata` likewise fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_audio_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_audio_data: Option<Vec<u8>>,
    #[serde(default = "default_style", deserialize_with = "style_or_default")]
    pub style: String,
    #[serde(default, deserialize_with = "metadata_or_default")]
    pub metadata: Metadata,
    #[serde(default = "Uuid::now_v7", deserialize_with = "request_id_or_new")]
    pub request_id: Uuid,
}

impl AudioRequest {
    /// Create a request with the default style and a fresh id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reference_audio_path: None,
            reference_audio_data: None,
            style: default_style(),
            metadata: Metadata::new(),
            request_id: Uuid::now_v7(),
        }
    }

    pub fn with_reference_path(mut self, path: impl Into<String>) -> Self {
        self.reference_audio_path = Some(path.into());
        self
    }

    pub fn with_reference_data(mut self, data: Vec<u8>) -> Self {
        self.reference_audio_data = Some(data);
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl TryFrom<&Payload> for AudioRequest {
    type Error = VoiceError;

    /// Accept either a typed request or an equivalent JSON mapping.
    fn try_from(payload: &Payload) -> Result<Self, Self::Error> {
        match payload {
            Payload::AudioRequest(request) => Ok(request.clone()),
            Payload::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| VoiceError::InvalidPayload(e.to_string())),
            other => Err(VoiceError::InvalidPayload(format!(
                "expected an audio request, got {}",
                other.kind()
            ))),
        }
    }
}

/// The result of processing an [`AudioRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioResponse {
    pub request_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<Vec<u8>>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AudioResponse {
    /// A successful response with no audio attached yet.
    pub fn success(request_id: Uuid) -> Self {
        Self {
            request_id,
            audio_path: None,
            audio_data: None,
            success: true,
            error: None,
            metadata: Metadata::new(),
        }
    }

    /// A failed response carrying an error message.
    pub fn failure(request_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            request_id,
            audio_path: None,
            audio_data: None,
            success: false,
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }

    pub fn with_audio_path(mut self, path: impl Into<String>) -> Self {
        self.audio_path = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Lifecycle status of a request, as reported on [`TOPIC_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Processing => write!(f, "processing"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Informational progress update for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(request_id: Uuid, status: RequestStatus, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time snapshot of voice protocol counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStats {
    pub requests_received: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
    pub active_requests: usize,
    /// Processor names in registration order.
    pub registered_processors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn audio_request_defaults() {
        let request = AudioRequest::new("Test").with_reference_path("test.wav");
        assert_eq!(request.text, "Test");
        assert_eq!(request.reference_audio_path.as_deref(), Some("test.wav"));
        assert_eq!(request.style, "en_default");
        assert!(request.metadata.is_empty());
        assert!(!request.request_id.is_nil());
    }

    #[test]
    fn audio_request_from_mapping_fills_missing_fields() {
        let payload = Payload::Json(json!({"text": "hi"}));
        let request = AudioRequest::try_from(&payload).unwrap();
        assert_eq!(request.text, "hi");
        assert_eq!(request.style, DEFAULT_STYLE);
        assert!(request.reference_audio_path.is_none());
        assert!(!request.request_id.is_nil());
    }

    #[test]
    fn audio_request_from_mapping_keeps_given_id() {
        let id = Uuid::now_v7();
        let payload = Payload::Json(json!({
            "text": "hello",
            "style": "en_us",
            "request_id": id,
            "metadata": {"example": 1}
        }));
        let request = AudioRequest::try_from(&payload).unwrap();
        assert_eq!(request.request_id, id);
        assert_eq!(request.style, "en_us");
        assert_eq!(request.metadata["example"], 1);
    }

    #[test]
    fn audio_request_from_mapping_treats_null_as_default() {
        let payload = Payload::Json(json!({
            "text": "hi",
            "request_id": null,
            "metadata": null,
            "style": null,
            "reference_audio_path": null
        }));
        let request = AudioRequest::try_from(&payload).unwrap();
        assert_eq!(request.text, "hi");
        assert_eq!(request.style, DEFAULT_STYLE);
        assert!(request.metadata.is_empty());
        assert!(!request.request_id.is_nil());
        assert!(request.reference_audio_path.is_none());

        // Null text is still an error
        let null_text = Payload::Json(json!({"text": null}));
        assert!(AudioRequest::try_from(&null_text).is_err());
    }

    #[test]
    fn audio_request_from_invalid_payload_fails() {
        let missing_text = Payload::Json(json!({"style": "en_default"}));
        assert!(matches!(
            AudioRequest::try_from(&missing_text),
            Err(VoiceError::InvalidPayload(_))
        ));

        let wrong_kind = Payload::AudioResponse(AudioResponse::success(Uuid::now_v7()));
        let err = AudioRequest::try_from(&wrong_kind).unwrap_err();
        assert!(err.to_string().contains("audio_response"));
    }

    #[test]
    fn audio_response_constructors() {
        let id = Uuid::now_v7();
        let ok = AudioResponse::success(id).with_audio_path("output.wav");
        assert!(ok.success);
        assert_eq!(ok.audio_path.as_deref(), Some("output.wav"));
        assert!(ok.error.is_none());

        let failed = AudioResponse::failure(id, "boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.request_id, id);
    }

    #[test]
    fn status_update_serializes_snake_case() {
        let update = StatusUpdate::new(Uuid::now_v7(), RequestStatus::Processing, "working");
        let json_str = serde_json::to_string(&update).unwrap();
        assert!(json_str.contains("\"status\":\"processing\""));
        assert_eq!(RequestStatus::Completed.to_string(), "completed");
    }
}
