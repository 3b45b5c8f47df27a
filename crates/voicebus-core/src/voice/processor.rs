//! AudioProcessor trait definition.
//!
//! The abstraction every speech backend implements. Uses RPITIT for
//! `process`; `BoxAudioProcessor` provides the object-safe wrapper used by
//! the registry.

use voicebus_types::error::ProcessorError;
use voicebus_types::voice::{AudioRequest, AudioResponse};

/// A backend that turns an [`AudioRequest`] into an [`AudioResponse`].
///
/// Returning `Ok` with `success == false` and returning `Err` are both
/// treated as "try the next processor" by the chain. Implementations live in
/// voicebus-infra (e.g. `FileAudioProcessor`, `RemoteAudioProcessor`).
pub trait AudioProcessor: Send + Sync {
    fn process(
        &self,
        request: &AudioRequest,
    ) -> impl std::future::Future<Output = Result<AudioResponse, ProcessorError>> + Send;
}
