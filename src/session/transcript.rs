//! Transcript assembly from streamed transcription fragments

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Emotion, TranscriptStore};

/// Leading all-caps tag such as `[HAPPY] `
static EMOTION_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([A-Z]+)\]\s*").expect("valid regex"));

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Model,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.pad("user"),
            Self::Model => f.pad("model"),
        }
    }
}

/// One committed line of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

impl TranscriptEntry {
    #[must_use]
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Fragments accumulated for the turn in progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTurnBuffer {
    pub input: String,
    pub output: String,
}

impl PendingTurnBuffer {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    /// Commit the trimmed, non-empty buffers and reset them
    pub fn drain(&mut self) -> Vec<TranscriptEntry> {
        let mut entries = Vec::with_capacity(2);
        let input = std::mem::take(&mut self.input);
        let output = std::mem::take(&mut self.output);

        if !input.trim().is_empty() {
            entries.push(TranscriptEntry::new(Speaker::User, input.trim()));
        }
        if !output.trim().is_empty() {
            entries.push(TranscriptEntry::new(Speaker::Model, output.trim()));
        }
        entries
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}

/// Strip a leading `[TAG]` from model text
///
/// Any all-caps tag is removed; the emotion is only reported when the tag is
/// one we recognize.
#[must_use]
pub fn extract_emotion_tag(text: &str) -> (Option<Emotion>, &str) {
    match EMOTION_TAG.captures(text) {
        Some(caps) => {
            let emotion = caps.get(1).and_then(|m| Emotion::from_tag(m.as_str()));
            let end = caps.get(0).map_or(0, |m| m.end());
            (emotion, &text[end..])
        }
        None => (None, text),
    }
}

/// Builds the committed transcript and the live interim line
pub struct TranscriptAssembler {
    pending: PendingTurnBuffer,
    interim: Option<String>,
    entries: Vec<TranscriptEntry>,
    store: TranscriptStore,
}

impl TranscriptAssembler {
    /// Create an assembler, restoring history from the store
    #[must_use]
    pub fn new(store: TranscriptStore) -> Self {
        let entries = store.load();
        if !entries.is_empty() {
            tracing::debug!(entries = entries.len(), "restored transcript");
        }
        Self {
            pending: PendingTurnBuffer::default(),
            interim: None,
            entries,
            store,
        }
    }

    /// Append a user speech fragment
    ///
    /// Returns `false` when `suppressed` is set; the fragment is dropped
    /// because it is most likely the assistant's own voice.
    pub fn push_input(&mut self, fragment: &str, suppressed: bool) -> bool {
        if suppressed {
            tracing::trace!(fragment, "dropping input fragment while assistant audio is live");
            return false;
        }
        self.pending.input.push_str(fragment);
        self.interim = Some(self.pending.input.clone());
        true
    }

    /// Append a model text fragment, returning its recognized emotion tag
    pub fn push_output(&mut self, fragment: &str) -> Option<Emotion> {
        let (emotion, text) = extract_emotion_tag(fragment);
        self.pending.output.push_str(text);
        self.interim = Some(self.pending.output.clone());
        emotion
    }

    /// Commit the pending turn, returning the new entries
    ///
    /// Persistence failures are logged; the in-memory transcript is
    /// authoritative.
    pub fn complete_turn(&mut self) -> Vec<TranscriptEntry> {
        let committed = self.pending.drain();
        self.interim = None;

        if committed.is_empty() {
            return committed;
        }

        if let Err(e) = self.store.append(&committed) {
            tracing::warn!(error = %e, "failed to persist transcript");
        }
        self.entries.extend(committed.iter().cloned());
        committed
    }

    /// Drop the turn in progress without committing it
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.interim = None;
    }

    /// Remove all history, in memory and on disk
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be truncated; memory is cleared
    /// regardless
    pub fn clear(&mut self) -> crate::Result<()> {
        self.entries.clear();
        self.discard_pending();
        self.store.clear()
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn interim(&self) -> Option<&str> {
        self.interim.as_deref()
    }

    #[must_use]
    pub const fn pending(&self) -> &PendingTurnBuffer {
        &self.pending
    }
}
