//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-live/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LiveConfigFile {
    /// Remote live model configuration
    #[serde(default)]
    pub remote: RemoteFileConfig,

    /// Session timing configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Transcript storage configuration
    #[serde(default)]
    pub transcript: TranscriptFileConfig,
}

/// Remote live model configuration
#[derive(Debug, Default, Deserialize)]
pub struct RemoteFileConfig {
    /// API key for the live service
    pub api_key: Option<String>,

    /// Websocket endpoint
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    pub voice: Option<String>,

    /// Persona / system instructions
    pub instructions: Option<String>,

    /// Tool names exposed to the model
    pub tools: Option<Vec<String>>,
}

/// Session timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Post-speech cooldown in milliseconds
    pub cooldown_ms: Option<u64>,

    /// Delay between teardown and re-acquiring devices, in milliseconds
    pub restart_delay_ms: Option<u64>,

    /// Samples per capture frame
    pub capture_frame_size: Option<usize>,

    /// Interval between camera frames in milliseconds
    pub video_frame_interval_ms: Option<u64>,
}

/// Transcript storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptFileConfig {
    /// Path to the transcript log
    pub path: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LiveConfigFile {
    config_file_path().map_or_else(LiveConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, with the same fallback rules
pub fn load_from(path: &Path) -> LiveConfigFile {
    if !path.exists() {
        return LiveConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LiveConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LiveConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon-live/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-live")
            .join("config.toml")
    })
}
