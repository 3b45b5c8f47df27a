//! Voice request/response protocol on top of the bus.
//!
//! `VoiceProcessor` subscribes to `voice.request`, runs each request through
//! the processor chain, and publishes exactly one terminal `AudioResponse`
//! on `voice.response` per request it receives. Progress goes to
//! `voice.status`.
//!
//! The bus holds only a weak reference back to the processor, so dropping
//! the `VoiceProcessor` tears its subscriptions down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use voicebus_types::bus::{Message, Metadata, Payload, Priority};
use voicebus_types::config::VoiceConfig;
use voicebus_types::error::{BusError, VoiceError};
use voicebus_types::voice::{
    AudioRequest, AudioResponse, RequestStatus, StatusUpdate, VoiceStats, TOPIC_REQUEST,
    TOPIC_RESPONSE, TOPIC_STATUS,
};

use super::box_processor::BoxAudioProcessor;
use super::chain::ProcessorChain;
use super::correlator::ResponseCorrelator;
use super::registry::{ProcessorEntry, ProcessorRegistry};
use crate::bus::{handler, handler_fn, HandlerRef, MessageHandler, PubSubService};

#[derive(Default)]
struct VoiceCounters {
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

struct VoiceInner {
    bus: PubSubService,
    registry: RwLock<ProcessorRegistry>,
    chain: ProcessorChain,
    active: Mutex<HashMap<Uuid, AudioRequest>>,
    counters: VoiceCounters,
    correlator: Arc<ResponseCorrelator>,
}

/// Dispatches audio requests to registered processors.
pub struct VoiceProcessor {
    inner: Arc<VoiceInner>,
    request_handler: HandlerRef,
    response_handler: HandlerRef,
}

/// Bus subscriber for `voice.request`.
struct RequestHandler {
    inner: Weak<VoiceInner>,
}

impl MessageHandler for RequestHandler {
    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.handle_request(&message).await,
            None => Ok(()),
        }
    }
}

impl VoiceProcessor {
    /// Create the protocol and subscribe it to the request topic.
    pub fn new(bus: PubSubService, config: &VoiceConfig) -> Self {
        let inner = Arc::new(VoiceInner {
            bus: bus.clone(),
            registry: RwLock::new(ProcessorRegistry::new()),
            chain: ProcessorChain::new(&config.preferred_marker, config.processor_timeout()),
            active: Mutex::new(HashMap::new()),
            counters: VoiceCounters::default(),
            correlator: Arc::new(ResponseCorrelator::new()),
        });

        let request_handler = handler(RequestHandler {
            inner: Arc::downgrade(&inner),
        });
        bus.subscribe(TOPIC_REQUEST, request_handler.clone());

        let correlator = Arc::clone(&inner.correlator);
        let response_handler = handler_fn(move |message: Arc<Message>| {
            let correlator = Arc::clone(&correlator);
            async move {
                if let Some(response) = response_from_payload(&message.payload) {
                    correlator.complete(response);
                }
                Ok(())
            }
        });
        bus.subscribe(TOPIC_RESPONSE, response_handler.clone());

        debug!("voice processor subscribed to {TOPIC_REQUEST}");
        Self {
            inner,
            request_handler,
            response_handler,
        }
    }

    /// Register (or replace) a processor by name.
    pub fn register_processor(&self, name: impl Into<String>, processor: BoxAudioProcessor) {
        let name = name.into();
        info!(processor = %name, "registered audio processor");
        self.inner.write_registry().register(name, processor);
    }

    /// Queue a request for processing and return its request id. Does not wait.
    pub fn submit(&self, request: AudioRequest) -> Result<Uuid, BusError> {
        let request_id = request.request_id;
        self.inner
            .bus
            .publish(TOPIC_REQUEST, request, Priority::Normal, Metadata::new())?;
        Ok(request_id)
    }

    /// Build a request from parts and submit it.
    pub fn request_audio(
        &self,
        text: &str,
        reference_audio_path: Option<&str>,
        style: Option<&str>,
        metadata: Metadata,
    ) -> Result<Uuid, BusError> {
        let mut request = AudioRequest::new(text).with_metadata(metadata);
        if let Some(path) = reference_audio_path {
            request = request.with_reference_path(path);
        }
        if let Some(style) = style {
            request = request.with_style(style);
        }
        self.submit(request)
    }

    /// Submit a request and wait for its terminal response.
    ///
    /// Requires a running bus. Must not be awaited from inside a bus handler:
    /// the response is delivered by the same worker that would be blocked.
    pub async fn request_and_wait(
        &self,
        request: AudioRequest,
        timeout: Duration,
    ) -> Result<AudioResponse, VoiceError> {
        let request_id = request.request_id;
        let reply = self.inner.correlator.register(request_id);

        if let Err(e) = self.submit(request) {
            self.inner.correlator.cancel(&request_id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(VoiceError::ResponseDropped(request_id)),
            Err(_) => {
                self.inner.correlator.cancel(&request_id);
                Err(VoiceError::Timeout {
                    request_id,
                    timeout,
                })
            }
        }
    }

    pub fn get_stats(&self) -> VoiceStats {
        let c = &self.inner.counters;
        VoiceStats {
            requests_received: c.received.load(Ordering::Relaxed),
            requests_processed: c.processed.load(Ordering::Relaxed),
            requests_failed: c.failed.load(Ordering::Relaxed),
            active_requests: self.inner.lock_active().len(),
            registered_processors: self.inner.read_registry().names(),
        }
    }

    pub fn bus(&self) -> &PubSubService {
        &self.inner.bus
    }
}

impl Drop for VoiceProcessor {
    fn drop(&mut self) {
        self.inner.bus.unsubscribe(TOPIC_REQUEST, &self.request_handler);
        self.inner
            .bus
            .unsubscribe(TOPIC_RESPONSE, &self.response_handler);
    }
}

impl std::fmt::Debug for VoiceProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceProcessor")
            .field("processors", &self.inner.read_registry().names())
            .field("active_requests", &self.inner.lock_active().len())
            .field("pending_waiters", &self.inner.correlator.pending_count())
            .finish()
    }
}

impl VoiceInner {
    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, ProcessorRegistry> {
        self.registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, ProcessorRegistry> {
        self.registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<Uuid, AudioRequest>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ordered_processors(&self) -> Vec<ProcessorEntry> {
        let snapshot = self.read_registry().snapshot();
        self.chain.order(snapshot)
    }

    async fn handle_request(&self, message: &Message) -> anyhow::Result<()> {
        let request = match AudioRequest::try_from(&message.payload) {
            Ok(request) => request,
            Err(e) => return self.reject(&message.payload, e),
        };
        let request_id = request.request_id;

        self.lock_active().insert(request_id, request.clone());
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.publish_status(
            request_id,
            RequestStatus::Processing,
            "Request received, processing...",
        );

        let entries = self.ordered_processors();
        let response = self
            .chain
            .run(&request, &entries, |name| {
                self.publish_status(
                    request_id,
                    RequestStatus::Processing,
                    format!("Trying processor: {name}"),
                );
            })
            .await;

        let success = response.success;
        if success {
            let processor = response
                .metadata
                .get("processor")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            self.publish_status(
                request_id,
                RequestStatus::Completed,
                format!("Successfully processed with {processor}"),
            );
        } else {
            self.publish_status(
                request_id,
                RequestStatus::Failed,
                response.error.clone().unwrap_or_default(),
            );
        }

        let published =
            self.publish_response(response, "request_id", json!(request_id.to_string()));

        self.lock_active().remove(&request_id);
        if success {
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        debug!(%request_id, success, "voice request finished");

        published.map(|_| ()).map_err(Into::into)
    }

    /// Answer a payload that is not a valid request with a failure response.
    fn reject(&self, payload: &Payload, reason: VoiceError) -> anyhow::Result<()> {
        let request_id = request_id_hint(payload);
        error!(%request_id, error = %reason, "error processing voice request");
        self.counters.failed.fetch_add(1, Ordering::Relaxed);

        let mut response = AudioResponse::failure(request_id, reason.to_string());
        response.metadata.insert("error".to_string(), json!(true));
        self.publish_response(response, "error", json!(true))
            .map(|_| ())
            .map_err(Into::into)
    }

    /// Publish a terminal response, tagging the message with `key` plus a timestamp.
    fn publish_response(
        &self,
        response: AudioResponse,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Uuid, BusError> {
        let mut metadata = Metadata::new();
        metadata.insert(key.to_string(), value);
        metadata.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));

        let request_id = response.request_id;
        self.bus
            .publish(TOPIC_RESPONSE, response, Priority::Normal, metadata)
            .inspect_err(|e| error!(%request_id, error = %e, "failed to publish voice response"))
    }

    /// Best effort: a full queue must not break request handling.
    fn publish_status(&self, request_id: Uuid, status: RequestStatus, message: impl Into<String>) {
        let update = StatusUpdate::new(request_id, status, message);
        if let Err(e) = self
            .bus
            .publish(TOPIC_STATUS, update, Priority::Normal, Metadata::new())
        {
            debug!(%request_id, error = %e, "dropped status update");
        }
    }
}

/// Request id from a payload that failed conversion, or nil.
fn request_id_hint(payload: &Payload) -> Uuid {
    match payload {
        Payload::Json(value) => value
            .get("request_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::nil),
        _ => Uuid::nil(),
    }
}

fn response_from_payload(payload: &Payload) -> Option<AudioResponse> {
    match payload {
        Payload::AudioResponse(response) => Some(response.clone()),
        Payload::Json(value) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}
