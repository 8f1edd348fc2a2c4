//! Capture and output device acquisition

use std::sync::Arc;

use super::capture::{FrameSink, MicrophoneCapture};
use super::clock::OutputClock;
use super::output::DeviceOutput;
use crate::{Error, Result};

/// An acquired input device streaming mono frames
pub trait InputDevice: Send {
    /// Native sample rate of the frames delivered to the sink
    fn sample_rate(&self) -> u32;

    /// Stop streaming and release the device
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to release
    fn release(&mut self) -> Result<()>;
}

/// A camera producing still frames on demand
pub trait FrameSource: Send {
    /// Grab the current frame as base64 JPEG; `None` if not ready yet
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be captured or encoded
    fn capture_jpeg(&mut self) -> Result<Option<String>>;

    /// Release the camera
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to release
    fn release(&mut self) -> Result<()>;
}

/// Opens the devices a live session needs
pub trait AudioBackend: Send + Sync {
    /// Acquire the microphone, delivering `frame_size`-sample frames to `sink`
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceAcquisition` if the microphone is denied or missing
    fn open_microphone(&self, frame_size: usize, sink: FrameSink) -> Result<Box<dyn InputDevice>>;

    /// Acquire the speaker as a schedulable clock
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceAcquisition` if no output device is usable
    fn open_output(&self) -> Result<Arc<dyn OutputClock>>;

    /// Acquire the camera
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceAcquisition` if no camera is available
    fn open_camera(&self) -> Result<Box<dyn FrameSource>>;
}

/// Default microphone and speaker through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_microphone(&self, frame_size: usize, sink: FrameSink) -> Result<Box<dyn InputDevice>> {
        Ok(Box::new(MicrophoneCapture::open(frame_size, sink)?))
    }

    fn open_output(&self) -> Result<Arc<dyn OutputClock>> {
        Ok(Arc::new(DeviceOutput::open()?))
    }

    fn open_camera(&self) -> Result<Box<dyn FrameSource>> {
        Err(Error::DeviceAcquisition(
            "no camera backend available".to_string(),
        ))
    }
}
