//! FileAudioProcessor -- writes request details to disk.
//!
//! Produces no synthesized speech. It records each request as a text file
//! and, when the reference clip exists, copies it as the "generated" audio.
//! Useful as a last-resort processor and for exercising the pipeline offline.

use std::path::{Path, PathBuf};

use tracing::warn;

use voicebus_core::voice::AudioProcessor;
use voicebus_types::error::ProcessorError;
use voicebus_types::voice::{AudioRequest, AudioResponse};

/// Name this processor registers under by default.
pub const FILE_PROCESSOR_NAME: &str = "file";

pub struct FileAudioProcessor {
    output_dir: PathBuf,
}

impl FileAudioProcessor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn write_artifacts(&self, request: &AudioRequest) -> std::io::Result<AudioResponse> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let id = request.request_id;
        let info_file = self.output_dir.join(format!("request_{id}.txt"));
        let metadata = serde_json::to_string(&request.metadata).unwrap_or_default();
        let info = format!(
            "Text: {}\nStyle: {}\nReference: {}\nMetadata: {}\n",
            request.text,
            request.style,
            request.reference_audio_path.as_deref().unwrap_or("None"),
            metadata,
        );
        tokio::fs::write(&info_file, info).await?;

        let mut response = AudioResponse::success(id)
            .with_metadata("processor", FILE_PROCESSOR_NAME.into())
            .with_metadata("info_file", info_file.display().to_string().into());

        if let Some(reference) = request.reference_audio_path.as_deref() {
            if tokio::fs::try_exists(reference).await.unwrap_or(false) {
                let audio_file = self.output_dir.join(format!("audio_{id}.wav"));
                tokio::fs::copy(reference, &audio_file).await?;
                response = response.with_audio_path(audio_file.display().to_string());
            }
        }

        Ok(response)
    }
}

impl AudioProcessor for FileAudioProcessor {
    async fn process(&self, request: &AudioRequest) -> Result<AudioResponse, ProcessorError> {
        match self.write_artifacts(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "file processor failed");
                Ok(AudioResponse::failure(
                    request.request_id,
                    format!("File processing failed: {e}"),
                ))
            }
        }
    }
}
