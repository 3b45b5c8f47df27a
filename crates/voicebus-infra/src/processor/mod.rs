//! Concrete [`AudioProcessor`](voicebus_core::voice::AudioProcessor) implementations.

pub mod file;
pub mod remote;

pub use file::{FileAudioProcessor, FILE_PROCESSOR_NAME};
pub use remote::{RemoteAudioProcessor, REMOTE_PROCESSOR_NAME};

use voicebus_core::voice::{BoxAudioProcessor, VoiceProcessor};
use voicebus_types::config::VoiceBusConfig;
use voicebus_types::error::ProcessorError;

/// Register the processors the config enables.
///
/// The remote processor is added only when `[remote].endpoint` is set; the
/// file processor is always added as the last resort. Returns the names
/// registered, in order.
pub fn register_configured_processors(
    voice: &VoiceProcessor,
    config: &VoiceBusConfig,
) -> Result<Vec<String>, ProcessorError> {
    let output_dir = &config.voice.output_dir;
    let mut names = Vec::new();

    if let Some(remote) = RemoteAudioProcessor::from_config(&config.remote, output_dir)? {
        let name = remote.name().to_string();
        voice.register_processor(name.clone(), BoxAudioProcessor::new(remote));
        names.push(name);
    }

    voice.register_processor(
        FILE_PROCESSOR_NAME,
        BoxAudioProcessor::new(FileAudioProcessor::new(output_dir)),
    );
    names.push(FILE_PROCESSOR_NAME.to_string());

    Ok(names)
}
