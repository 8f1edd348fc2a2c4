//! Audio capture from microphone

use std::sync::mpsc;

use cpal::Stream;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc::UnboundedSender;

use super::device::InputDevice;
use crate::{Error, Result};

/// Receives fixed-size mono capture frames
pub type FrameSink = UnboundedSender<Vec<f32>>;

/// Splits an interleaved callback buffer into mono frames of a fixed size
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    channels: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    /// Create a chunker for `channels` interleaved input channels
    #[must_use]
    pub fn new(frame_size: usize, channels: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            channels: channels.max(1),
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Down-mix `data` to mono and return every completed frame
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, data: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        for frame in data.chunks(self.channels) {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            self.pending.push(mono);
            if self.pending.len() == self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        frames
    }
}

/// Captures audio from the default input device at its native rate
///
/// Frames are handed to the sink without blocking; the stream is owned by a
/// dedicated thread and dropped when the capture is released.
pub struct MicrophoneCapture {
    sample_rate: u32,
    shutdown: Option<mpsc::Sender<()>>,
}

impl MicrophoneCapture {
    /// Open the default input device and start streaming frames into `sink`
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceAcquisition` if the microphone cannot be opened
    pub fn open(frame_size: usize, sink: FrameSink) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("beacon-live-capture".to_string())
            .spawn(move || match build_stream(frame_size, sink) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    tracing::debug!("audio capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::DeviceAcquisition("capture thread exited".to_string()))??;

        Ok(Self {
            sample_rate,
            shutdown: Some(shutdown_tx),
        })
    }
}

fn build_stream(frame_size: usize, sink: FrameSink) -> Result<(Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceAcquisition("no input device available".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| Error::DeviceAcquisition(e.to_string()))?;
    let config = supported.config();
    let sample_rate = config.sample_rate.0;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        frame_size,
        "audio capture initialized"
    );

    let mut chunker = FrameChunker::new(frame_size, channels);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in chunker.push(data) {
                    // Receiver gone means the session is tearing down
                    let _ = sink.send(frame);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceAcquisition(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceAcquisition(e.to_string()))?;

    tracing::debug!("audio capture started");
    Ok((stream, sample_rate))
}

impl InputDevice for MicrophoneCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn release(&mut self) -> Result<()> {
        // Dropping the sender wakes the capture thread, which drops the stream
        self.shutdown.take();
        Ok(())
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.shutdown.take();
    }
}

/// Root-mean-square energy of a block of samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Convert f32 samples to 16-bit WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for sample in super::encode::to_pcm16(samples) {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
