//! Turn-taking state machine and capture gate

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{Emotion, SessionStatus};
use crate::voice::PlaybackScheduler;

/// Tracks session status, emotion and the post-speech cooldown
///
/// Every transition method returns `true` when the observable state changed.
/// Transitions that do not apply to the current status are ignored.
#[derive(Debug, Default)]
pub struct TurnStateMachine {
    status: SessionStatus,
    emotion: Emotion,
    cooldown: Arc<AtomicBool>,
}

impl TurnStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub const fn emotion(&self) -> Emotion {
        self.emotion
    }

    /// Whether the post-speech cooldown is running
    #[must_use]
    pub fn cooldown_active(&self) -> bool {
        self.cooldown.load(Ordering::Acquire)
    }

    /// Shared cooldown flag for the capture path
    #[must_use]
    pub fn cooldown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cooldown)
    }

    /// `Idle | Error -> Connecting`
    pub fn connecting(&mut self) -> bool {
        if !self.status.can_start() {
            tracing::debug!(status = %self.status, "start ignored; session already active");
            return false;
        }
        self.emotion = Emotion::Neutral;
        self.set_cooldown(false);
        self.set_status(SessionStatus::Connecting)
    }

    /// Remote handshake completed: `Connecting -> Listening`
    pub fn handshake_complete(&mut self) -> bool {
        if self.status != SessionStatus::Connecting {
            return false;
        }
        self.set_status(SessionStatus::Listening)
    }

    /// Model requested tools
    pub fn tool_call(&mut self) -> bool {
        if !self.status.is_live() {
            return false;
        }
        let emotion_changed = self.set_emotion(Emotion::Thinking);
        self.set_status(SessionStatus::Thinking) || emotion_changed
    }

    /// Model audio arrived
    pub fn audio_chunk(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.set_status(SessionStatus::Speaking)
    }

    /// Accepted user speech fragment
    pub fn input_fragment(&mut self) -> bool {
        if !self.status.is_live() {
            return false;
        }
        let emotion_changed = self.set_emotion(Emotion::Neutral);
        self.set_status(SessionStatus::Listening) || emotion_changed
    }

    /// Model text fragment, optionally carrying a recognized emotion tag
    pub fn output_fragment(&mut self, emotion: Option<Emotion>) -> bool {
        if !self.status.is_live() {
            return false;
        }
        let emotion_changed = emotion.is_some_and(|e| self.set_emotion(e));
        self.set_status(SessionStatus::Speaking) || emotion_changed
    }

    /// User barged in; playback has already been cut
    pub fn interrupted(&mut self) -> bool {
        if !self.status.is_live() {
            return false;
        }
        self.set_cooldown(false);
        let emotion_changed = self.set_emotion(Emotion::Neutral);
        self.set_status(SessionStatus::Listening) || emotion_changed
    }

    /// Playback drained after a completed turn
    pub fn begin_cooldown(&mut self) {
        if self.status.is_active() {
            self.set_cooldown(true);
        }
    }

    /// Cooldown timer fired
    ///
    /// `still_speaking` is re-checked by the caller because new audio may
    /// have been scheduled while the cooldown ran.
    pub fn end_cooldown(&mut self, still_speaking: bool) -> bool {
        self.set_cooldown(false);
        if !self.status.is_live() {
            return false;
        }
        let emotion_changed = self.set_emotion(Emotion::Neutral);
        let next = if still_speaking {
            SessionStatus::Speaking
        } else {
            SessionStatus::Listening
        };
        self.set_status(next) || emotion_changed
    }

    /// Session failed; sticky until the next start
    pub fn fail(&mut self) -> bool {
        self.set_cooldown(false);
        let emotion_changed = self.set_emotion(Emotion::Neutral);
        self.set_status(SessionStatus::Error) || emotion_changed
    }

    /// User stopped the session
    pub fn stop(&mut self) -> bool {
        self.set_cooldown(false);
        let emotion_changed = self.set_emotion(Emotion::Neutral);
        self.set_status(SessionStatus::Idle) || emotion_changed
    }

    fn set_status(&mut self, next: SessionStatus) -> bool {
        if self.status == next {
            return false;
        }
        tracing::debug!(from = %self.status, to = %next, "session status");
        self.status = next;
        true
    }

    fn set_emotion(&mut self, next: Emotion) -> bool {
        let changed = self.emotion != next;
        self.emotion = next;
        changed
    }

    fn set_cooldown(&self, active: bool) {
        self.cooldown.store(active, Ordering::Release);
    }
}

/// Decides per captured frame whether microphone audio is muted
///
/// The gate is closed while model audio is outstanding or the post-speech
/// cooldown runs, so the assistant never hears itself.
#[derive(Clone)]
pub struct CaptureGate {
    scheduler: Option<Arc<Mutex<PlaybackScheduler>>>,
    cooldown: Arc<AtomicBool>,
}

impl CaptureGate {
    #[must_use]
    pub const fn new(
        scheduler: Option<Arc<Mutex<PlaybackScheduler>>>,
        cooldown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            scheduler,
            cooldown,
        }
    }

    /// Whether the current frame must be replaced with silence
    #[must_use]
    pub fn is_closed(&self) -> bool {
        if self.cooldown.load(Ordering::Acquire) {
            return true;
        }
        self.scheduler.as_ref().is_some_and(|scheduler| {
            scheduler
                .lock()
                .map(|s| s.is_speaking())
                .unwrap_or(false)
        })
    }
}

impl std::fmt::Debug for CaptureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureGate")
            .field("cooldown", &self.cooldown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
