//! Gapless playback scheduling of inbound model audio
//!
//! Each decoded chunk starts at `max(watermark, now)` and pushes the watermark
//! forward by its duration, so chunks play back-to-back in arrival order and
//! never start in the past.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use super::clock::{OutputClock, SegmentId};
use crate::{Error, Result};

/// Sample rate of audio produced by the live model
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Decode base64 little-endian PCM16 into normalized floats
///
/// # Errors
///
/// Returns `Error::Decode` for invalid base64, empty payloads or an odd byte count
pub fn decode_pcm16(data: &str) -> Result<Vec<f32>> {
    let bytes = B64
        .decode(data)
        .map_err(|e| Error::Decode(format!("invalid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(Error::Decode("empty audio chunk".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "odd PCM16 byte count: {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// A segment handed to the output clock and not yet finished
#[derive(Debug, Clone, Copy, PartialEq)]
struct Outstanding {
    id: SegmentId,
    end: f64,
}

/// Schedules decoded chunks back-to-back on an output clock
pub struct PlaybackScheduler {
    clock: Arc<dyn OutputClock>,
    next_start_time: f64,
    outstanding: Vec<Outstanding>,
}

impl PlaybackScheduler {
    /// Create a scheduler on the given output clock
    pub fn new(clock: Arc<dyn OutputClock>) -> Self {
        let next_start_time = clock.now();
        Self {
            clock,
            next_start_time,
            outstanding: Vec::new(),
        }
    }

    /// Decode and schedule a base64 PCM16 chunk at 24 kHz
    ///
    /// On decode failure the chunk is dropped and the watermark is untouched.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` for malformed chunks, or the clock's error if
    /// it refuses the segment
    pub fn schedule(&mut self, chunk: &str) -> Result<SegmentId> {
        let samples = decode_pcm16(chunk)?;
        self.schedule_samples(samples, PLAYBACK_SAMPLE_RATE)
    }

    /// Schedule already decoded samples
    ///
    /// # Errors
    ///
    /// Returns the clock's error if it refuses the segment
    #[allow(clippy::cast_precision_loss)]
    pub fn schedule_samples(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<SegmentId> {
        if sample_rate == 0 {
            return Err(Error::Decode("zero sample rate".to_string()));
        }

        let now = self.clock.now();
        self.reap(now);

        let duration = samples.len() as f64 / f64::from(sample_rate);
        let start = self.next_start_time.max(now);
        let id = self.clock.schedule(samples, sample_rate, start)?;

        self.next_start_time = start + duration;
        self.outstanding.push(Outstanding {
            id,
            end: self.next_start_time,
        });

        tracing::trace!(
            segment = id,
            start,
            duration,
            watermark = self.next_start_time,
            "scheduled playback segment"
        );
        Ok(id)
    }

    /// Stop all outstanding segments and pull the watermark back to now
    ///
    /// Returns the number of segments that were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.outstanding.len();
        for segment in self.outstanding.drain(..) {
            if let Err(e) = self.clock.stop(segment.id) {
                tracing::debug!(segment = segment.id, error = %e, "failed to stop segment");
            }
        }
        self.next_start_time = self.clock.now();

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Whether queued audio is still ahead of the output clock
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.clock.now() < self.next_start_time
    }

    /// Time until the watermark is reached (zero when drained)
    #[must_use]
    pub fn remaining(&self) -> Duration {
        let left = self.next_start_time - self.clock.now();
        if left > 0.0 {
            Duration::from_secs_f64(left)
        } else {
            Duration::ZERO
        }
    }

    /// Earliest time the next chunk may begin
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Number of segments scheduled and not yet finished
    pub fn outstanding(&mut self) -> usize {
        let now = self.clock.now();
        self.reap(now);
        self.outstanding.len()
    }

    /// The clock this scheduler writes to
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn OutputClock> {
        &self.clock
    }

    /// Drop segments that have finished playing naturally
    fn reap(&mut self, now: f64) {
        self.outstanding.retain(|s| s.end > now);
    }
}
