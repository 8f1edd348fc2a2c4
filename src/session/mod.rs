//! Live session orchestration
//!
//! The [`SessionEngine`] owns a single conversation with the model: device
//! lifecycle, turn-taking, the capture gate that keeps the assistant from
//! hearing itself, tool dispatch and the transcript.

mod engine;
mod lifecycle;
mod status;
mod store;
mod transcript;
mod turn;

pub use engine::{
    AcquiredDevices, Command, SessionEngine, SessionEvent, SessionHandle, SessionView, TurnTimer,
};
pub use lifecycle::{SessionResources, SharedCamera};
pub use status::{Emotion, SessionStatus};
pub use store::TranscriptStore;
pub use transcript::{
    PendingTurnBuffer, Speaker, TranscriptAssembler, TranscriptEntry, extract_emotion_tag,
};
pub use turn::{CaptureGate, TurnStateMachine};
