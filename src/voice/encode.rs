//! Outbound audio encoding
//!
//! Converts native-rate mono capture frames to 16 kHz little-endian PCM16,
//! base64-wrapped for the live session.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Serialize;

/// Sample rate expected by the live service for input audio
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// MIME type attached to every outbound audio payload
pub const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Encoded outbound audio frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pcm16Payload {
    /// Base64 of little-endian signed 16-bit samples
    pub data: String,
    /// Always [`PCM_MIME_TYPE`]
    pub mime_type: &'static str,
}

impl Pcm16Payload {
    /// Number of PCM samples carried by this payload
    #[must_use]
    pub fn sample_count(&self) -> usize {
        B64.decode(&self.data).map_or(0, |bytes| bytes.len() / 2)
    }
}

/// Encode a capture frame for transmission
///
/// When `gated` is set the frame is replaced with silence of the same length
/// before resampling, so the outbound cadence never stops. Empty frames,
/// non-finite samples and a zero source rate are treated as silence rather
/// than errors.
#[must_use]
pub fn encode(frame: &[f32], source_rate: u32, gated: bool) -> Pcm16Payload {
    if source_rate == 0 {
        tracing::trace!("capture frame with zero sample rate, sending silence");
        return pack(&[]);
    }

    let malformed = frame.iter().any(|s| !s.is_finite());
    if malformed {
        tracing::trace!(len = frame.len(), "non-finite capture frame, sending silence");
    }

    let resampled = if gated || malformed {
        let silence = vec![0.0; frame.len()];
        resample_linear(&silence, source_rate)
    } else {
        resample_linear(frame, source_rate)
    };

    pack(&to_pcm16(&resampled))
}

/// Resample to 16 kHz by linear interpolation
///
/// Output length is `floor(len / (source_rate / 16000))`; each output sample
/// interpolates between the two nearest source samples.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample_linear(frame: &[f32], source_rate: u32) -> Vec<f32> {
    if source_rate == TARGET_SAMPLE_RATE || frame.is_empty() {
        return frame.to_vec();
    }

    let ratio = f64::from(source_rate) / f64::from(TARGET_SAMPLE_RATE);
    let out_len = (frame.len() as f64 / ratio).floor() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let index = pos.floor() as usize;
            let fraction = (pos - pos.floor()) as f32;

            let a = frame[index.min(frame.len() - 1)];
            let b = frame.get(index + 1).copied().unwrap_or(a);
            (b - a).mul_add(fraction, a)
        })
        .collect()
}

/// Clamp to `[-1, 1]` and scale to signed 16-bit
///
/// Negative values scale by 32768 and non-negative by 32767 so +1.0 cannot
/// overflow.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

fn pack(samples: &[i16]) -> Pcm16Payload {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }

    Pcm16Payload {
        data: B64.encode(&bytes),
        mime_type: PCM_MIME_TYPE,
    }
}
