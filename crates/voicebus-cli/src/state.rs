//! Application state wiring the bus, the voice protocol and its processors.

use std::path::{Path, PathBuf};

use tracing::debug;

use voicebus_core::bus::PubSubService;
use voicebus_core::voice::VoiceProcessor;
use voicebus_infra::config::{config_path, load_config, load_config_file, resolve_data_dir};
use voicebus_infra::processor::register_configured_processors;
use voicebus_types::config::VoiceBusConfig;

/// Everything a command needs, built once per invocation.
pub struct AppState {
    pub config: VoiceBusConfig,
    pub bus: PubSubService,
    pub voice: VoiceProcessor,
    pub processors: Vec<String>,
}

impl AppState {
    /// Load configuration (from `config_override` or the data dir), create the
    /// bus and the voice protocol, and register the configured processors.
    ///
    /// The bus is created stopped; commands start it when they are ready.
    pub async fn init(config_override: Option<&Path>) -> anyhow::Result<Self> {
        let (config, config_path) = Self::load(config_override).await?;

        let bus = PubSubService::with_config(config.bus.clone());
        let voice = VoiceProcessor::new(bus.clone(), &config.voice);
        let processors = register_configured_processors(&voice, &config)?;
        debug!(config = %config_path.display(), ?processors, "app state ready");

        Ok(Self {
            config,
            bus,
            voice,
            processors,
        })
    }

    /// Load configuration only.
    pub async fn load(config_override: Option<&Path>) -> anyhow::Result<(VoiceBusConfig, PathBuf)> {
        match config_override {
            Some(path) => Ok((load_config_file(path).await?, path.to_path_buf())),
            None => {
                let data_dir = resolve_data_dir();
                Ok((load_config(&data_dir).await?, config_path(&data_dir)))
            }
        }
    }
}
