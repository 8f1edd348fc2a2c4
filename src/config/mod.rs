//! Configuration management for Beacon Live

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::tools::ToolName;
use crate::{Error, Result};

/// Default live model endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default live model identifier
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Default persona instructions
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are JARVIS, a friendly, smart and energetic voice assistant.

Capabilities:
- Answer questions concisely. Use the searchWeb tool when the user asks to open or see results.
- You can see the user's camera feed when it is on. Analyze it when relevant.
- Use your tools freely. To play music, use playSongOnYoutube.

Protocol:
- Start every response with an emotion tag: [NEUTRAL], [THINKING], [HAPPY], [WITTY], [SARCASTIC] or [HELPFUL].
- Be concise. Do not ramble.
- Do not ask \"Is there anything else?\".";

/// Default post-speech cooldown
const DEFAULT_COOLDOWN_MS: u64 = 1000;

/// Default settle delay between teardown and device re-acquisition
const DEFAULT_RESTART_DELAY_MS: u64 = 500;

/// Default samples per capture frame
const DEFAULT_CAPTURE_FRAME_SIZE: usize = 4096;

/// Default camera frame interval (5 fps)
const DEFAULT_VIDEO_FRAME_INTERVAL_MS: u64 = 200;

/// Beacon Live configuration
#[derive(Debug)]
pub struct Config {
    /// Remote live model configuration
    pub remote: RemoteConfig,

    /// Session timing configuration
    pub session: SessionConfig,

    /// Path to the persisted transcript log
    pub transcript_path: PathBuf,
}

/// Connection parameters passed once when the remote session opens
#[derive(Debug)]
pub struct RemoteConfig {
    /// API key (from `GEMINI_API_KEY` env)
    pub api_key: Option<SecretString>,

    /// Websocket endpoint
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// Persona / system instructions
    pub instructions: String,

    /// Tools exposed to the model
    pub tools: Vec<ToolName>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            tools: ToolName::ALL.to_vec(),
        }
    }
}

/// Session engine timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Grace period after model speech during which capture stays gated
    pub cooldown: Duration,

    /// Delay between teardown and re-acquiring devices on start
    pub restart_delay: Duration,

    /// Samples per capture frame delivered by the microphone
    pub capture_frame_size: usize,

    /// Interval between camera frames
    pub video_frame_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            capture_frame_size: DEFAULT_CAPTURE_FRAME_SIZE,
            video_frame_interval: Duration::from_millis(DEFAULT_VIDEO_FRAME_INTERVAL_MS),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Resolve configuration from a parsed config file plus environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_file(fc: file::LiveConfigFile) -> Result<Self> {
        let tools = match fc.remote.tools {
            Some(names) => parse_tool_names(&names)?,
            None => ToolName::ALL.to_vec(),
        };

        let remote = RemoteConfig {
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .or(fc.remote.api_key)
                .map(SecretString::from),
            endpoint: std::env::var("BEACON_LIVE_ENDPOINT")
                .ok()
                .or(fc.remote.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: std::env::var("BEACON_LIVE_MODEL")
                .ok()
                .or(fc.remote.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: std::env::var("BEACON_LIVE_VOICE")
                .ok()
                .or(fc.remote.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            instructions: fc
                .remote
                .instructions
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            tools,
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            cooldown: env_millis("BEACON_LIVE_COOLDOWN_MS")
                .or(fc.session.cooldown_ms)
                .map_or(defaults.cooldown, Duration::from_millis),
            restart_delay: fc
                .session
                .restart_delay_ms
                .map_or(defaults.restart_delay, Duration::from_millis),
            capture_frame_size: fc
                .session
                .capture_frame_size
                .unwrap_or(defaults.capture_frame_size),
            video_frame_interval: fc
                .session
                .video_frame_interval_ms
                .map_or(defaults.video_frame_interval, Duration::from_millis),
        };

        if session.capture_frame_size == 0 {
            return Err(Error::Config(
                "session.capture_frame_size must be positive".to_string(),
            ));
        }
        if session.video_frame_interval.is_zero() {
            return Err(Error::Config(
                "session.video_frame_interval_ms must be positive".to_string(),
            ));
        }

        let transcript_path = std::env::var("BEACON_LIVE_TRANSCRIPT")
            .ok()
            .or(fc.transcript.path)
            .map_or_else(default_transcript_path, PathBuf::from);

        Ok(Self {
            remote,
            session,
            transcript_path,
        })
    }
}

fn env_millis(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn parse_tool_names(names: &[String]) -> Result<Vec<ToolName>> {
    names
        .iter()
        .map(|name| {
            ToolName::from_name(name)
                .ok_or_else(|| Error::Config(format!("unknown tool in remote.tools: {name}")))
        })
        .collect()
}

/// Default transcript path: `~/.local/share/omni/beacon-live/transcript.jsonl`
#[must_use]
pub fn default_transcript_path() -> PathBuf {
    let data_dir = directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/omni/beacon-live"),
        |d| d.data_dir().join("omni").join("beacon-live"),
    );

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::warn!(
            path = %data_dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    data_dir.join("transcript.jsonl")
}
