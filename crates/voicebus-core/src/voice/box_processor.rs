//! BoxAudioProcessor -- object-safe dynamic dispatch wrapper for AudioProcessor.
//!
//! 1. An object-safe `AudioProcessorDyn` trait with boxed futures
//! 2. Blanket-impl `AudioProcessorDyn` for all `T: AudioProcessor`
//! 3. `BoxAudioProcessor` wraps `Box<dyn AudioProcessorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use voicebus_types::error::ProcessorError;
use voicebus_types::voice::{AudioRequest, AudioResponse};

use super::processor::AudioProcessor;

/// Object-safe version of [`AudioProcessor`] with boxed futures.
pub trait AudioProcessorDyn: Send + Sync {
    fn process_boxed<'a>(
        &'a self,
        request: &'a AudioRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AudioResponse, ProcessorError>> + Send + 'a>>;
}

impl<T: AudioProcessor> AudioProcessorDyn for T {
    fn process_boxed<'a>(
        &'a self,
        request: &'a AudioRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AudioResponse, ProcessorError>> + Send + 'a>> {
        Box::pin(self.process(request))
    }
}

/// Type-erased audio processor for runtime registration.
pub struct BoxAudioProcessor {
    inner: Box<dyn AudioProcessorDyn + Send + Sync>,
}

impl BoxAudioProcessor {
    pub fn new<T: AudioProcessor + 'static>(processor: T) -> Self {
        Self {
            inner: Box::new(processor),
        }
    }

    pub async fn process(&self, request: &AudioRequest) -> Result<AudioResponse, ProcessorError> {
        self.inner.process_boxed(request).await
    }
}

impl std::fmt::Debug for BoxAudioProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxAudioProcessor")
    }
}

/// Adapter for a plain synchronous function.
pub struct FnProcessor<F> {
    f: F,
}

impl<F> AudioProcessor for FnProcessor<F>
where
    F: Fn(&AudioRequest) -> Result<AudioResponse, ProcessorError> + Send + Sync,
{
    fn process(
        &self,
        request: &AudioRequest,
    ) -> impl Future<Output = Result<AudioResponse, ProcessorError>> + Send {
        std::future::ready((self.f)(request))
    }
}

/// Build a processor from a synchronous closure.
///
/// The closure runs on the bus worker, so it should be quick.
pub fn processor_fn<F>(f: F) -> BoxAudioProcessor
where
    F: Fn(&AudioRequest) -> Result<AudioResponse, ProcessorError> + Send + Sync + 'static,
{
    BoxAudioProcessor::new(FnProcessor { f })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl AudioProcessor for Echo {
        async fn process(&self, request: &AudioRequest) -> Result<AudioResponse, ProcessorError> {
            Ok(AudioResponse::success(request.request_id).with_audio_path(request.text.clone()))
        }
    }

    #[tokio::test]
    async fn boxed_trait_processor_delegates() {
        let boxed = BoxAudioProcessor::new(Echo);
        let request = AudioRequest::new("out.wav");
        let response = boxed.process(&request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.audio_path.as_deref(), Some("out.wav"));
        assert_eq!(response.request_id, request.request_id);
    }

    #[tokio::test]
    async fn closure_processor_can_fail() {
        let boxed = processor_fn(|_req| Err(ProcessorError::Failed("no voice".into())));
        let err = boxed.process(&AudioRequest::new("x")).await.unwrap_err();
        assert!(err.to_string().contains("no voice"));
    }
}
