//! Remote model session transport
//!
//! A [`Connector`] opens a [`RemoteSession`] and reports everything the remote
//! side does through a [`RemoteEventSink`]. The sink is tagged with the
//! session generation so events from a torn-down connection are recognized
//! and dropped by the engine.

mod gemini;
pub mod protocol;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::config::RemoteConfig;
use crate::session::SessionEvent;
use crate::tools::{ToolCallRequest, ToolCallResult, ToolName};
use crate::voice::Pcm16Payload;

pub use gemini::GeminiConnector;

/// Parameters sent with the opening handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub tools: Vec<ToolName>,
}

impl From<&RemoteConfig> for SessionSetup {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            instructions: config.instructions.clone(),
            tools: config.tools.clone(),
        }
    }
}

/// A decoded message from the model
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// The model wants these tools run
    ToolCall(Vec<ToolCallRequest>),
    /// Transcription of user speech
    InputTranscription(String),
    /// Transcription of model speech
    OutputTranscription(String),
    /// Base64 PCM16 audio at 24 kHz
    Audio(String),
    /// The user barged in; drop queued playback
    Interrupted,
    /// The model finished its turn
    TurnComplete,
}

/// Something the remote side did
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Handshake completed
    Open,
    Message(ServerMessage),
    Error(String),
    Closed(String),
}

/// Delivers remote events to the session engine
#[derive(Debug, Clone)]
pub struct RemoteEventSink {
    generation: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl RemoteEventSink {
    pub(crate) const fn new(generation: u64, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, events }
    }

    /// Generation of the session this sink belongs to
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn open(&self) -> bool {
        self.emit(RemoteEvent::Open)
    }

    pub fn message(&self, message: ServerMessage) -> bool {
        self.emit(RemoteEvent::Message(message))
    }

    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.emit(RemoteEvent::Error(reason.into()))
    }

    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.emit(RemoteEvent::Closed(reason.into()))
    }

    /// Returns `false` once the engine has shut down
    fn emit(&self, event: RemoteEvent) -> bool {
        self.events
            .send(SessionEvent::Remote {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// An open bidirectional session with the model
///
/// Sends are non-blocking and queue behind the connection; an error means
/// the session is already closed.
pub trait RemoteSession: Send + Sync {
    /// Stream one microphone frame
    ///
    /// # Errors
    ///
    /// Returns error if the session is closed
    fn send_audio(&self, payload: &Pcm16Payload) -> Result<()>;

    /// Stream one base64 JPEG camera frame
    ///
    /// # Errors
    ///
    /// Returns error if the session is closed
    fn send_video_frame(&self, jpeg_base64: &str) -> Result<()>;

    /// Answer one tool call
    ///
    /// # Errors
    ///
    /// Returns error if the session is closed
    fn send_tool_result(&self, result: &ToolCallResult) -> Result<()>;

    /// Close the connection; later sends fail
    ///
    /// # Errors
    ///
    /// Returns error if the close could not be queued
    fn close(&self) -> Result<()>;
}

/// Opens remote sessions
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and send the setup handshake
    ///
    /// `Open` is reported through `events` once the remote acknowledges the
    /// setup.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn connect(
        &self,
        setup: &SessionSetup,
        events: RemoteEventSink,
    ) -> Result<Arc<dyn RemoteSession>>;
}
