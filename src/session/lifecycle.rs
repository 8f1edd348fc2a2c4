//! Resources owned by one live session and their ordered teardown

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Result;
use crate::transport::RemoteSession;
use crate::voice::{FrameSource, InputDevice, PlaybackScheduler};

/// Shared handle to an open camera
pub type SharedCamera = Arc<Mutex<Box<dyn FrameSource>>>;

/// Everything a running session holds
///
/// Fields are `None` until acquired and again after teardown.
#[derive(Default)]
pub struct SessionResources {
    /// Settle delay or connect in flight
    pub startup: Option<JoinHandle<()>>,
    pub turn_timer: Option<JoinHandle<()>>,
    pub video_timer: Option<JoinHandle<()>>,
    pub scheduler: Option<Arc<Mutex<PlaybackScheduler>>>,
    pub capture_pump: Option<JoinHandle<()>>,
    /// Captured frames waiting for the handshake before the pump takes them
    pub pending_frames: Option<mpsc::UnboundedReceiver<Vec<f32>>>,
    pub microphone: Option<Box<dyn InputDevice>>,
    pub camera: Option<SharedCamera>,
    pub remote: Option<Arc<dyn RemoteSession>>,
}

impl SessionResources {
    /// Whether anything is still held
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.startup.is_none()
            && self.turn_timer.is_none()
            && self.video_timer.is_none()
            && self.scheduler.is_none()
            && self.capture_pump.is_none()
            && self.pending_frames.is_none()
            && self.microphone.is_none()
            && self.camera.is_none()
            && self.remote.is_none()
    }

    /// Cancel the turn timer, if one is armed
    pub fn cancel_turn_timer(&mut self) {
        if let Some(timer) = self.turn_timer.take() {
            timer.abort();
        }
    }

    /// Stop sending camera frames and release the camera
    pub fn stop_camera(&mut self) {
        if let Some(timer) = self.video_timer.take() {
            timer.abort();
        }
        if let Some(camera) = self.camera.take() {
            step("release camera", || release_camera(&camera));
        }
    }

    /// Release everything, in dependency order
    ///
    /// Each step is best-effort: a failure is logged and the remaining steps
    /// still run. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.is_empty() {
            return;
        }
        tracing::debug!("tearing down session resources");

        if let Some(startup) = self.startup.take() {
            startup.abort();
        }
        self.cancel_turn_timer();
        if let Some(timer) = self.video_timer.take() {
            timer.abort();
        }

        if let Some(scheduler) = &self.scheduler {
            step("stop playback", || {
                if let Ok(mut s) = scheduler.lock() {
                    s.interrupt();
                }
                Ok(())
            });
        }

        if let Some(pump) = self.capture_pump.take() {
            pump.abort();
        }
        self.pending_frames = None;

        if let Some(mut microphone) = self.microphone.take() {
            step("release microphone", || microphone.release());
        }
        if let Some(camera) = self.camera.take() {
            step("release camera", || release_camera(&camera));
        }

        if let Some(scheduler) = self.scheduler.take() {
            step("close output", || {
                let clock = match scheduler.lock() {
                    Ok(s) => Arc::clone(s.clock()),
                    Err(poisoned) => Arc::clone(poisoned.into_inner().clock()),
                };
                clock.close()
            });
        }

        if let Some(remote) = self.remote.take() {
            step("close remote session", || remote.close());
        }
    }
}

fn release_camera(camera: &SharedCamera) -> Result<()> {
    match camera.lock() {
        Ok(mut c) => c.release(),
        Err(poisoned) => poisoned.into_inner().release(),
    }
}

fn step(name: &str, f: impl FnOnce() -> Result<()>) {
    if let Err(e) = f() {
        tracing::warn!(step = name, error = %e, "teardown step failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::tools::ToolCallResult;
    use crate::voice::{OutputClock, Pcm16Payload, VirtualClock};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct FailingMic(Log);

    impl InputDevice for FailingMic {
        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn release(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("mic");
            Err(Error::Audio("already gone".to_string()))
        }
    }

    struct Camera(Log);

    impl FrameSource for Camera {
        fn capture_jpeg(&mut self) -> Result<Option<String>> {
            Ok(None)
        }

        fn release(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("camera");
            Ok(())
        }
    }

    struct Remote(Log);

    impl RemoteSession for Remote {
        fn send_audio(&self, _: &Pcm16Payload) -> Result<()> {
            Ok(())
        }

        fn send_video_frame(&self, _: &str) -> Result<()> {
            Ok(())
        }

        fn send_tool_result(&self, _: &ToolCallResult) -> Result<()> {
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.0.lock().unwrap().push("remote");
            Ok(())
        }
    }

    #[test]
    fn test_teardown_releases_in_order_despite_failures() {
        let log: Log = Arc::default();
        let clock = Arc::new(VirtualClock::manual());
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(
            Arc::clone(&clock) as Arc<dyn OutputClock>
        )));
        let segment = scheduler
            .lock()
            .unwrap()
            .schedule_samples(vec![0.0; 24_000], 24_000)
            .unwrap();

        let mut resources = SessionResources {
            scheduler: Some(scheduler),
            microphone: Some(Box::new(FailingMic(Arc::clone(&log)))),
            camera: Some(Arc::new(Mutex::new(
                Box::new(Camera(Arc::clone(&log))) as Box<dyn FrameSource>
            ))),
            remote: Some(Arc::new(Remote(Arc::clone(&log)))),
            ..SessionResources::default()
        };

        resources.teardown();

        assert_eq!(*log.lock().unwrap(), ["mic", "camera", "remote"]);
        assert_eq!(clock.stopped(), vec![segment]);
        assert!(clock.is_closed());
        assert!(resources.is_empty());

        resources.teardown();
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_stop_camera_keeps_session() {
        let log: Log = Arc::default();
        let mut resources = SessionResources {
            camera: Some(Arc::new(Mutex::new(
                Box::new(Camera(Arc::clone(&log))) as Box<dyn FrameSource>
            ))),
            remote: Some(Arc::new(Remote(Arc::clone(&log)))),
            ..SessionResources::default()
        };

        resources.stop_camera();
        assert!(resources.camera.is_none());
        assert!(resources.remote.is_some());
        assert_eq!(*log.lock().unwrap(), ["camera"]);
    }
}
