//! Configuration loader for VoiceBus.
//!
//! Reads `config.toml` from the data directory (`~/.voicebus/` by default)
//! and deserializes it into [`VoiceBusConfig`]. A missing file is not an
//! error: every field has a default.

use std::path::{Path, PathBuf};

use voicebus_types::config::VoiceBusConfig;
use voicebus_types::error::ConfigError;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "VOICEBUS_DATA_DIR";

/// Resolve the data directory.
///
/// Priority: `$VOICEBUS_DATA_DIR`, then `~/.voicebus`, then `./.voicebus`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".voicebus");
    }

    PathBuf::from(".voicebus")
}

/// Path of the config file inside a data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Load `{data_dir}/config.toml`.
pub async fn load_config(data_dir: &Path) -> Result<VoiceBusConfig, ConfigError> {
    load_config_file(&config_path(data_dir)).await
}

/// Load a specific config file.
///
/// - Missing file: [`VoiceBusConfig::default()`].
/// - Unreadable file: [`ConfigError::Io`].
/// - Invalid TOML or wrong field types: [`ConfigError::Parse`].
pub async fn load_config_file(path: &Path) -> Result<VoiceBusConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(VoiceBusConfig::default());
        }
        Err(err) => return Err(ConfigError::Io(err)),
    };

    toml::from_str::<VoiceBusConfig>(&content)
        .map_err(|err| ConfigError::Parse(format!("{}: {err}", path.display())))
}
