//! Ordered processor fallback chain.
//!
//! Processors are tried one at a time until one reports success. Each
//! attempt is isolated: an error, a `success == false` response, a panic or
//! an exceeded time limit is logged and the chain moves on.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, warn};

use voicebus_types::error::ProcessorError;
use voicebus_types::voice::{AudioRequest, AudioResponse, NO_PROCESSOR_ERROR};

use super::registry::ProcessorEntry;
use crate::bus::service::panic_message;

/// Tries processors in preference order.
#[derive(Debug, Clone)]
pub struct ProcessorChain {
    preferred_marker: String,
    timeout: Option<Duration>,
}

impl ProcessorChain {
    pub fn new(preferred_marker: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            preferred_marker: preferred_marker.into().to_lowercase(),
            timeout,
        }
    }

    /// Whether `name` carries the preferred marker.
    pub fn is_preferred(&self, name: &str) -> bool {
        !self.preferred_marker.is_empty() && name.to_lowercase().contains(&self.preferred_marker)
    }

    /// Preferred processors first, otherwise registration order. Stable.
    pub fn order(&self, mut entries: Vec<ProcessorEntry>) -> Vec<ProcessorEntry> {
        entries.sort_by_key(|(name, _)| !self.is_preferred(name));
        entries
    }

    /// Run the request through `entries` (already ordered).
    ///
    /// `on_attempt` is called with each processor's name right before it is
    /// invoked. Always returns a response for `request.request_id`.
    pub async fn run<F>(
        &self,
        request: &AudioRequest,
        entries: &[ProcessorEntry],
        mut on_attempt: F,
    ) -> AudioResponse
    where
        F: FnMut(&str),
    {
        for (name, processor) in entries {
            on_attempt(name);

            let attempt = AssertUnwindSafe(processor.process(request)).catch_unwind();
            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => Ok(Err(ProcessorError::Timeout(limit))),
                },
                None => attempt.await,
            };

            match outcome {
                Ok(Ok(mut response)) if response.success => {
                    response.request_id = request.request_id;
                    response
                        .metadata
                        .entry("processor".to_string())
                        .or_insert_with(|| serde_json::Value::String(name.clone()));
                    debug!(request_id = %request.request_id, processor = %name, "processor succeeded");
                    return response;
                }
                Ok(Ok(response)) => {
                    warn!(
                        request_id = %request.request_id,
                        processor = %name,
                        error = response.error.as_deref().unwrap_or("unknown error"),
                        "processor reported failure"
                    );
                }
                Ok(Err(error)) => {
                    warn!(
                        request_id = %request.request_id,
                        processor = %name,
                        error = %error,
                        "processor failed"
                    );
                }
                Err(panic) => {
                    warn!(
                        request_id = %request.request_id,
                        processor = %name,
                        panic = panic_message(panic.as_ref()),
                        "processor panicked"
                    );
                }
            }
        }

        AudioResponse::failure(request.request_id, NO_PROCESSOR_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::voice::box_processor::{processor_fn, BoxAudioProcessor};
    use crate::voice::processor::AudioProcessor;

    fn entry(name: &str, processor: BoxAudioProcessor) -> ProcessorEntry {
        (name.to_string(), Arc::new(processor))
    }

    fn ok(tag: &'static str) -> BoxAudioProcessor {
        processor_fn(move |req| Ok(AudioResponse::success(req.request_id).with_audio_path(tag)))
    }

    fn names(entries: &[ProcessorEntry]) -> Vec<&str> {
        entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    struct Slow;

    impl AudioProcessor for Slow {
        async fn process(&self, request: &AudioRequest) -> Result<AudioResponse, ProcessorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(AudioResponse::success(request.request_id))
        }
    }

    #[test]
    fn preferred_processors_move_to_the_front() {
        let chain = ProcessorChain::new("openvoice", None);
        let ordered = chain.order(vec![
            entry("file", ok("f")),
            entry("remote", ok("r")),
            entry("OpenVoice-local", ok("o")),
            entry("backup", ok("b")),
        ]);
        assert_eq!(names(&ordered), vec!["OpenVoice-local", "file", "remote", "backup"]);
    }

    #[tokio::test]
    async fn falls_through_every_kind_of_failure() {
        let chain = ProcessorChain::new("openvoice", None);
        let entries = vec![
            entry("errors", processor_fn(|_| Err(ProcessorError::Failed("boom".into())))),
            entry(
                "declines",
                processor_fn(|req| Ok(AudioResponse::failure(req.request_id, "no"))),
            ),
            entry("panics", processor_fn(|_| panic!("processor bug"))),
            entry("works", ok("out.wav")),
            entry("never", ok("unused.wav")),
        ];

        let mut attempted = Vec::new();
        let request = AudioRequest::new("hello");
        let response = chain
            .run(&request, &entries, |name| attempted.push(name.to_string()))
            .await;

        assert!(response.success);
        assert_eq!(response.audio_path.as_deref(), Some("out.wav"));
        assert_eq!(response.metadata["processor"], json!("works"));
        assert_eq!(attempted, vec!["errors", "declines", "panics", "works"]);
    }

    #[tokio::test]
    async fn success_is_rebound_to_the_request_id() {
        let chain = ProcessorChain::new("openvoice", None);
        let entries = vec![entry(
            "liar",
            processor_fn(|_| {
                Ok(AudioResponse::success(uuid::Uuid::nil()).with_metadata("processor", json!("custom")))
            }),
        )];
        let request = AudioRequest::new("hello");
        let response = chain.run(&request, &entries, |_| {}).await;

        assert_eq!(response.request_id, request.request_id);
        // An existing processor tag is left alone
        assert_eq!(response.metadata["processor"], json!("custom"));
    }

    #[tokio::test]
    async fn exhaustion_yields_failure() {
        let chain = ProcessorChain::new("openvoice", None);
        let request = AudioRequest::new("hello");

        let response = chain.run(&request, &[], |_| {}).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(NO_PROCESSOR_ERROR));
        assert_eq!(response.request_id, request.request_id);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_processor_is_skipped_after_timeout() {
        let chain = ProcessorChain::new("openvoice", Some(Duration::from_millis(50)));
        let entries = vec![
            entry("slow", BoxAudioProcessor::new(Slow)),
            entry("fast", ok("fast.wav")),
        ];
        let response = chain.run(&AudioRequest::new("x"), &entries, |_| {}).await;
        assert_eq!(response.metadata["processor"], json!("fast"));
    }
}
