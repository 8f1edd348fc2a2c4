//! Speaker output driven as a schedulable clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::clock::{OutputClock, SegmentId};
use super::playback::PLAYBACK_SAMPLE_RATE;
use crate::{Error, Result};

struct Voice {
    id: SegmentId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Segments waiting for or in playback, plus the render position
#[derive(Default)]
struct Mixer {
    frames_rendered: u64,
    sample_rate: u32,
    voices: Vec<Voice>,
}

impl Mixer {
    fn render(&mut self, data: &mut [f32], channels: usize) {
        let base = self.frames_rendered;
        for (i, frame) in data.chunks_mut(channels.max(1)).enumerate() {
            let position = base + i as u64;
            let mut sample = 0.0;
            for voice in &self.voices {
                if position >= voice.start_frame && position < voice.end_frame() {
                    #[allow(clippy::cast_possible_truncation)]
                    let offset = (position - voice.start_frame) as usize;
                    sample += voice.samples[offset];
                }
            }
            let sample = sample.clamp(-1.0, 1.0);
            for out in frame.iter_mut() {
                *out = sample;
            }
        }

        self.frames_rendered = base + (data.len() / channels.max(1)) as u64;
        let rendered = self.frames_rendered;
        self.voices.retain(|v| v.end_frame() > rendered);
    }
}

/// Default output device exposed as an [`OutputClock`]
///
/// The cpal stream lives on a dedicated thread because streams are not `Send`
/// on every platform; clock time is derived from frames rendered.
pub struct DeviceOutput {
    mixer: Arc<Mutex<Mixer>>,
    next_id: AtomicU64,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl DeviceOutput {
    /// Open the default output device at 24 kHz
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceAcquisition` if no usable output device exists
    pub fn open() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_mixer = Arc::clone(&mixer);
        std::thread::Builder::new()
            .name("beacon-live-output".to_string())
            .spawn(move || match build_stream(thread_mixer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until close() drops the sender
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    tracing::debug!("audio output stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::DeviceAcquisition("output thread exited".to_string()))??;

        Ok(Self {
            mixer,
            next_id: AtomicU64::new(1),
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    fn with_mixer<T>(&self, f: impl FnOnce(&mut Mixer) -> T) -> T {
        let mut mixer = self
            .mixer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut mixer)
    }
}

fn build_stream(mixer: Arc<Mutex<Mixer>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceAcquisition("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceAcquisition(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::DeviceAcquisition("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();
    let channels = usize::from(config.channels);

    if let Ok(mut m) = mixer.lock() {
        m.sample_rate = PLAYBACK_SAMPLE_RATE;
    }

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels,
        "audio output initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if let Ok(mut m) = mixer.lock() {
                    m.render(data, channels);
                } else {
                    data.fill(0.0);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio output error");
            },
            None,
        )
        .map_err(|e| Error::DeviceAcquisition(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceAcquisition(e.to_string()))?;
    Ok(stream)
}

impl OutputClock for DeviceOutput {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        self.with_mixer(|m| m.frames_rendered as f64 / f64::from(m.sample_rate.max(1)))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn schedule(&self, samples: Vec<f32>, sample_rate: u32, start_at: f64) -> Result<SegmentId> {
        if sample_rate != PLAYBACK_SAMPLE_RATE {
            return Err(Error::Audio(format!(
                "segment rate {sample_rate} does not match output rate {PLAYBACK_SAMPLE_RATE}"
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.with_mixer(|m| {
            let start_frame = (start_at.max(0.0) * f64::from(m.sample_rate)).round() as u64;
            m.voices.push(Voice {
                id,
                start_frame: start_frame.max(m.frames_rendered),
                samples,
            });
        });
        Ok(id)
    }

    fn stop(&self, id: SegmentId) -> Result<()> {
        self.with_mixer(|m| m.voices.retain(|v| v.id != id));
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        drop(sender);
        self.with_mixer(|m| m.voices.clear());
        Ok(())
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
