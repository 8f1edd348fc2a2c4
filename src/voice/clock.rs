//! Output audio clock abstraction
//!
//! The playback scheduler only needs a monotonic notion of "now" and the
//! ability to start a buffer at an absolute time on that clock.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{Error, Result};

/// Identifier of a scheduled playback segment
pub type SegmentId = u64;

/// An output device timeline that buffers can be scheduled against
pub trait OutputClock: Send + Sync {
    /// Current time on the output clock, in seconds
    fn now(&self) -> f64;

    /// Schedule mono samples to start playing at `start_at` seconds
    ///
    /// # Errors
    ///
    /// Returns error if the clock has been closed
    fn schedule(&self, samples: Vec<f32>, sample_rate: u32, start_at: f64) -> Result<SegmentId>;

    /// Stop a segment immediately; unknown or finished segments are ignored
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the request
    fn stop(&self, id: SegmentId) -> Result<()>;

    /// Release the output device
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to close
    fn close(&self) -> Result<()>;
}

/// Record of a segment scheduled on a [`VirtualClock`]
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug)]
enum TimeSource {
    /// Time only moves through [`VirtualClock::advance`]
    Manual(Mutex<f64>),
    /// Time follows the tokio timer (pausable in tests)
    Tokio(tokio::time::Instant),
}

/// Output clock without a sound card
///
/// Used for headless sessions and tests. Nothing is rendered; scheduled and
/// stopped segments are recorded for inspection.
#[derive(Debug)]
pub struct VirtualClock {
    source: TimeSource,
    next_id: AtomicU64,
    scheduled: Mutex<Vec<ScheduledSegment>>,
    stopped: Mutex<Vec<SegmentId>>,
    closed: AtomicBool,
}

impl VirtualClock {
    /// Clock that advances with the tokio timer
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(TimeSource::Tokio(tokio::time::Instant::now()))
    }

    /// Clock that stands still until [`advance`](Self::advance) is called
    #[must_use]
    pub fn manual() -> Self {
        Self::with_source(TimeSource::Manual(Mutex::new(0.0)))
    }

    fn with_source(source: TimeSource) -> Self {
        Self {
            source,
            next_id: AtomicU64::new(1),
            scheduled: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Move a manual clock forward; no effect on a tokio-driven clock
    pub fn advance(&self, secs: f64) {
        if let TimeSource::Manual(t) = &self.source {
            if let Ok(mut t) = t.lock() {
                *t += secs.max(0.0);
            }
        }
    }

    /// All segments scheduled so far
    #[must_use]
    pub fn scheduled(&self) -> Vec<ScheduledSegment> {
        self.scheduled
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// All segments stopped early so far
    #[must_use]
    pub fn stopped(&self) -> Vec<SegmentId> {
        self.stopped.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Whether [`OutputClock::close`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for VirtualClock {
    fn now(&self) -> f64 {
        match &self.source {
            TimeSource::Manual(t) => t.lock().map(|t| *t).unwrap_or_default(),
            TimeSource::Tokio(origin) => origin.elapsed().as_secs_f64(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn schedule(&self, samples: Vec<f32>, sample_rate: u32, start_at: f64) -> Result<SegmentId> {
        if self.is_closed() {
            return Err(Error::Audio("output clock is closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let duration = samples.len() as f64 / f64::from(sample_rate.max(1));
        if let Ok(mut scheduled) = self.scheduled.lock() {
            scheduled.push(ScheduledSegment {
                id,
                start: start_at,
                duration,
            });
        }
        Ok(id)
    }

    fn stop(&self, id: SegmentId) -> Result<()> {
        if let Ok(mut stopped) = self.stopped.lock() {
            stopped.push(id);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
