//! RemoteAudioProcessor -- voice cloning through a hosted inference endpoint.
//!
//! POSTs `{text, style, reference_audio}` (reference clip base64-encoded) to
//! the configured endpoint and saves the returned audio. Hosted endpoints
//! cold-start, so transport errors, 429 and 5xx are retried on a bounded
//! backoff schedule; any other status fails immediately.
//!
//! The bearer token is held as a [`SecretString`] and only exposed when
//! building the request header.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use voicebus_core::voice::AudioProcessor;
use voicebus_types::config::RemoteConfig;
use voicebus_types::error::ProcessorError;
use voicebus_types::voice::{AudioRequest, AudioResponse};

/// Name this processor registers under by default. Carries the preferred
/// marker so the chain tries it first.
pub const REMOTE_PROCESSOR_NAME: &str = "openvoice";

/// JSON body sent to the endpoint.
#[derive(Debug, Serialize)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub style: &'a str,
    /// Base64-encoded reference clip.
    pub reference_audio: String,
}

/// JSON body an endpoint may answer with instead of raw audio bytes.
#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    audio: String,
}

/// Outcome of one HTTP attempt.
enum AttemptError {
    Retryable(String),
    Fatal(String),
}

pub struct RemoteAudioProcessor {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
    backoff: Vec<Duration>,
    max_text_chars: usize,
    output_dir: PathBuf,
}

impl RemoteAudioProcessor {
    /// Create a processor with the default retry schedule and text limit.
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<SecretString>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, ProcessorError> {
        let defaults = RemoteConfig::default();
        Self::build(
            endpoint.into(),
            token,
            output_dir.into(),
            Duration::from_secs(defaults.request_timeout_secs),
        )
        .map(|p| {
            p.with_backoff(defaults.backoff_secs.iter().copied().map(Duration::from_secs).collect())
                .with_max_text_chars(defaults.max_text_chars)
        })
    }

    /// Build from the `[remote]` config section.
    ///
    /// Returns `Ok(None)` when no endpoint is configured. The token is read
    /// from the environment variable named by `token_env`, if set.
    pub fn from_config(
        config: &RemoteConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Option<Self>, ProcessorError> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Ok(None);
        };
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);
        if token.is_none() {
            debug!(env = %config.token_env, "no token for remote processor, sending unauthenticated requests");
        }

        let processor = Self::build(
            endpoint,
            token,
            output_dir.into(),
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_backoff(config.backoff_secs.iter().copied().map(Duration::from_secs).collect())
        .with_max_text_chars(config.max_text_chars);
        Ok(Some(processor))
    }

    fn build(
        endpoint: String,
        token: Option<SecretString>,
        output_dir: PathBuf,
        request_timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProcessorError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: REMOTE_PROCESSOR_NAME.to_string(),
            client,
            endpoint,
            token,
            backoff: Vec::new(),
            max_text_chars: usize::MAX,
            output_dir,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Backoff schedule. N entries mean N attempts (minimum one); entry `i` is
    /// the wait after failed attempt `i + 1`, so the last entry is never slept.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_text_chars(mut self, max: usize) -> Self {
        self.max_text_chars = max;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_attempts(&self) -> usize {
        self.backoff.len().max(1)
    }

    /// Cut `text` to at most `max_text_chars` characters.
    pub fn truncate_text<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.max_text_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    /// Shape the JSON body for a request and its reference clip bytes.
    pub fn build_body<'a>(&self, request: &'a AudioRequest, reference: &[u8]) -> SynthesisRequest<'a> {
        SynthesisRequest {
            text: self.truncate_text(&request.text),
            style: &request.style,
            reference_audio: BASE64.encode(reference),
        }
    }

    /// Read the reference clip, preferring inline bytes over the path.
    async fn load_reference(&self, request: &AudioRequest) -> Result<Vec<u8>, ProcessorError> {
        if let Some(data) = &request.reference_audio_data {
            return Ok(data.clone());
        }
        let Some(path) = request.reference_audio_path.as_deref() else {
            return Err(ProcessorError::InvalidRequest(
                "Reference audio path required".to_string(),
            ));
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                ProcessorError::InvalidRequest(format!("Reference audio not found: {path}")),
            ),
            Err(e) => Err(ProcessorError::Io(e)),
        }
    }

    async fn attempt(&self, body: &SynthesisRequest<'_>) -> Result<Vec<u8>, AttemptError> {
        let mut builder = self.client.post(&self.endpoint).json(body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {error_body}");
            return Err(if is_retryable(status) {
                AttemptError::Retryable(message)
            } else {
                AttemptError::Fatal(message)
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttemptError::Retryable(format!("failed to read response body: {e}")))?;

        if is_json {
            decode_json_audio(&bytes).map_err(AttemptError::Fatal)
        } else {
            Ok(bytes.to_vec())
        }
    }

    /// Run the attempts, sleeping per the backoff schedule between them.
    async fn call_with_retry(&self, body: &SynthesisRequest<'_>) -> Result<Vec<u8>, ProcessorError> {
        let attempts = self.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!(processor = %self.name, attempt, attempts, "calling remote endpoint");
            match self.attempt(body).await {
                Ok(audio) => return Ok(audio),
                Err(AttemptError::Fatal(message)) => return Err(ProcessorError::Http(message)),
                Err(AttemptError::Retryable(message)) => {
                    last_error = message;
                    if attempt < attempts {
                        let wait = self.backoff[attempt - 1];
                        warn!(
                            processor = %self.name,
                            attempt,
                            attempts,
                            error = %last_error,
                            "remote call failed, retrying in {wait:?}"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        Err(ProcessorError::Http(format!(
            "remote call never succeeded after {attempts} attempts: {last_error}"
        )))
    }

    fn output_path(&self, request: &AudioRequest) -> PathBuf {
        self.output_dir
            .join(format!("remote_{}.wav", request.request_id))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl AudioProcessor for RemoteAudioProcessor {
    async fn process(&self, request: &AudioRequest) -> Result<AudioResponse, ProcessorError> {
        let reference = self.load_reference(request).await?;

        if request.text.chars().count() > self.max_text_chars {
            warn!(
                request_id = %request.request_id,
                limit = self.max_text_chars,
                "text too long, truncating"
            );
        }
        let body = self.build_body(request, &reference);

        let audio = self.call_with_retry(&body).await?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_path(request);
        tokio::fs::write(&output, &audio).await?;
        info!(request_id = %request.request_id, path = %output.display(), "remote audio saved");

        Ok(AudioResponse::success(request.request_id)
            .with_audio_path(output.display().to_string())
            .with_metadata("processor", self.name.clone().into())
            .with_metadata("style", request.style.clone().into()))
    }
}

// No Debug impl: the token must never end up in logs.

/// Whether a non-success status is worth retrying.
pub fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn decode_json_audio(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let parsed: SynthesisResponse =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON response: {e}"))?;
    BASE64
        .decode(parsed.audio.as_bytes())
        .map_err(|e| format!("invalid base64 audio: {e}"))
}
