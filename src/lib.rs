//! Beacon Live - real-time voice sessions with a multimodal model
//!
//! This library provides the pieces of a hands-free voice assistant:
//! - Microphone capture and 16 kHz PCM16 encoding
//! - Gap-free scheduled playback of streamed model audio
//! - Turn-taking with a capture gate so the assistant never hears itself
//! - Function calling against local actions
//! - A persisted conversation transcript
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  SessionHandle                       │
//! │    start  │  stop  │  camera  │  clear  │  view     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ commands
//! ┌────────────────────▼────────────────────────────────┐
//! │                 SessionEngine                        │
//! │  Turn state  │  Capture gate  │  Tools  │ Transcript │
//! └──────┬─────────────────────────────────┬────────────┘
//!        │ frames / playback               │ events
//! ┌──────▼──────────────┐      ┌───────────▼────────────┐
//! │  Voice (cpal)       │      │  Transport (Gemini Live)│
//! └─────────────────────┘      └────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod tools;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    Command, Emotion, SessionEngine, SessionHandle, SessionStatus, SessionView, Speaker,
    TranscriptEntry, TranscriptStore,
};
pub use tools::{Actions, SystemActions, ToolDispatcher, ToolName};
pub use transport::{Connector, GeminiConnector, RemoteSession, SessionSetup};
pub use voice::{AudioBackend, CpalBackend, PlaybackScheduler};
