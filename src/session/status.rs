//! Session status and assistant emotion

use serde::{Deserialize, Serialize};

/// Lifecycle and turn status of a live session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session; ready to start
    #[default]
    Idle,
    /// Devices acquired or being acquired, waiting for the remote handshake
    Connecting,
    /// Streaming microphone audio, waiting for the user
    Listening,
    /// Model is running tools
    Thinking,
    /// Model audio is playing
    Speaking,
    /// Session failed; sticky until restarted
    Error,
}

impl SessionStatus {
    /// Whether a session currently owns devices and a remote connection
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Listening | Self::Thinking | Self::Speaking
        )
    }

    /// Whether the remote handshake has completed
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Listening | Self::Thinking | Self::Speaking)
    }

    /// Whether `start` may be issued from this status without a teardown
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }

    /// User-facing status line
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Ready. Start a new chat.",
            Self::Connecting => "Connecting...",
            Self::Listening => "Listening...",
            Self::Thinking => "Thinking...",
            Self::Speaking => "Speaking...",
            Self::Error => "Error occurred. Please restart.",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Assistant mood, carried as a `[TAG]` prefix on model text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sarcastic,
    Witty,
    Helpful,
    Thinking,
}

impl Emotion {
    /// Parse an all-caps tag such as `HAPPY`
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "NEUTRAL" => Some(Self::Neutral),
            "HAPPY" => Some(Self::Happy),
            "SARCASTIC" => Some(Self::Sarcastic),
            "WITTY" => Some(Self::Witty),
            "HELPFUL" => Some(Self::Helpful),
            "THINKING" => Some(Self::Thinking),
            _ => None,
        }
    }

    /// The tag text without brackets
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Neutral => "NEUTRAL",
            Self::Happy => "HAPPY",
            Self::Sarcastic => "SARCASTIC",
            Self::Witty => "WITTY",
            Self::Helpful => "HELPFUL",
            Self::Thinking => "THINKING",
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}
