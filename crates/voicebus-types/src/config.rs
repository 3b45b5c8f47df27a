//! Configuration types for VoiceBus.
//!
//! `VoiceBusConfig` represents the top-level `config.toml`. Every field has a
//! default, so an empty or missing file yields a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.voicebus/config.toml` (or `$VOICEBUS_DATA_DIR/config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceBusConfig {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub voice: VoiceConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Settings for the message bus and its dispatch worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum number of pending deliveries before `publish` is rejected.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// How long the worker waits for new work before re-checking for shutdown.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Messages retained per topic history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Default wait for the worker to exit on shutdown.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_history_capacity() -> usize {
    100
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            poll_interval_ms: default_poll_interval_ms(),
            history_capacity: default_history_capacity(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Settings for the voice request/response protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Processors whose name contains this marker (case-insensitive) are tried first.
    #[serde(default = "default_preferred_marker")]
    pub preferred_marker: String,

    /// Upper bound on a single processor invocation. Unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_timeout_secs: Option<u64>,

    /// Directory processors write generated artifacts into.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_preferred_marker() -> String {
    "openvoice".to_string()
}

fn default_output_dir() -> String {
    "voice_clone_output".to_string()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            preferred_marker: default_preferred_marker(),
            processor_timeout_secs: None,
            output_dir: default_output_dir(),
        }
    }
}

impl VoiceConfig {
    pub fn processor_timeout(&self) -> Option<Duration> {
        self.processor_timeout_secs.map(Duration::from_secs)
    }
}

/// Settings for the remote inference processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Endpoint URL. The remote processor is only registered when this is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Sleep before each retry; the number of entries bounds the attempts.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// Per-attempt HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Longer input text is truncated to this many characters.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

fn default_token_env() -> String {
    "HF_TOKEN".to_string()
}

fn default_backoff_secs() -> Vec<u64> {
    vec![5, 10, 20, 30, 45, 60]
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_text_chars() -> usize {
    200
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_env: default_token_env(),
            backoff_secs: default_backoff_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = VoiceBusConfig::default();
        assert_eq!(config.bus.max_queue_size, 1000);
        assert_eq!(config.bus.history_capacity, 100);
        assert_eq!(config.bus.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.voice.preferred_marker, "openvoice");
        assert!(config.voice.processor_timeout().is_none());
        assert!(config.remote.endpoint.is_none());
        assert_eq!(config.remote.backoff_secs.len(), 6);
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: VoiceBusConfig = toml::from_str("").unwrap();
        assert_eq!(config.bus.max_queue_size, 1000);
        assert_eq!(config.voice.output_dir, "voice_clone_output");
        assert_eq!(config.remote.token_env, "HF_TOKEN");
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
[bus]
max_queue_size = 16
poll_interval_ms = 20

[voice]
preferred_marker = "remote"
processor_timeout_secs = 30

[remote]
endpoint = "https://tts.example.com/synthesize"
backoff_secs = [1, 2]
"#;
        let config: VoiceBusConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bus.max_queue_size, 16);
        assert_eq!(config.bus.poll_interval_ms, 20);
        // Unspecified fields in a present table still default
        assert_eq!(config.bus.history_capacity, 100);
        assert_eq!(config.voice.preferred_marker, "remote");
        assert_eq!(config.voice.processor_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.remote.endpoint.as_deref(),
            Some("https://tts.example.com/synthesize")
        );
        assert_eq!(config.remote.backoff_secs, vec![1, 2]);
        assert_eq!(config.remote.max_text_chars, 200);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let mut config = VoiceBusConfig::default();
        config.bus.max_queue_size = 42;
        let json = serde_json::to_string(&config).unwrap();
        let parsed: VoiceBusConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.bus.max_queue_size, 42);
    }
}
