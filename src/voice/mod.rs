//! Voice processing module
//!
//! Handles microphone capture, outbound encoding, and scheduled playback of
//! model audio on an output clock.

mod capture;
mod clock;
mod device;
mod encode;
mod output;
mod playback;

pub use capture::{FrameChunker, FrameSink, MicrophoneCapture, calculate_rms, samples_to_wav};
pub use clock::{OutputClock, ScheduledSegment, SegmentId, VirtualClock};
pub use device::{AudioBackend, CpalBackend, FrameSource, InputDevice};
pub use encode::{
    PCM_MIME_TYPE, Pcm16Payload, TARGET_SAMPLE_RATE, encode, resample_linear, to_pcm16,
};
pub use output::DeviceOutput;
pub use playback::{PLAYBACK_SAMPLE_RATE, PlaybackScheduler, decode_pcm16};
