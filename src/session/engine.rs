//! The session engine
//!
//! One task owns all session state and processes commands, remote events,
//! timer expiries and tool results strictly in order. Other tasks only post
//! events; nothing else mutates the session.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::lifecycle::{SessionResources, SharedCamera};
use super::{
    CaptureGate, Emotion, SessionStatus, TranscriptAssembler, TranscriptEntry, TranscriptStore,
    TurnStateMachine,
};
use crate::config::SessionConfig;
use crate::tools::{Actions, ToolCallRequest, ToolCallResult, ToolDispatcher};
use crate::transport::{
    Connector, RemoteEvent, RemoteEventSink, RemoteSession, ServerMessage, SessionSetup,
};
use crate::voice::{AudioBackend, InputDevice, OutputClock, PlaybackScheduler, encode};
use crate::{Error, Result};

/// Lower bound between playback drain checks
const DRAIN_RECHECK: Duration = Duration::from_millis(50);

/// User commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    ToggleCamera,
    ClearTranscript,
    Shutdown,
}

/// Timers that advance a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTimer {
    /// Check whether queued playback has finished
    DrainCheck,
    /// The post-speech cooldown elapsed
    CooldownEnd,
}

/// Microphone and speaker acquired for a session that is still starting
pub struct AcquiredDevices {
    microphone: Box<dyn InputDevice>,
    frames: mpsc::UnboundedReceiver<Vec<f32>>,
    output: Arc<dyn OutputClock>,
}

impl AcquiredDevices {
    /// Release devices nobody will use
    fn release(mut self) {
        if let Err(e) = self.microphone.release() {
            tracing::warn!(error = %e, "failed to release microphone");
        }
        if let Err(e) = self.output.close() {
            tracing::warn!(error = %e, "failed to close output");
        }
    }
}

impl fmt::Debug for AcquiredDevices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredDevices")
            .field("sample_rate", &self.microphone.sample_rate())
            .finish_non_exhaustive()
    }
}

/// Everything the engine reacts to besides user commands
///
/// Events carry the generation of the session that produced them; the
/// engine ignores anything from an older generation.
pub enum SessionEvent {
    /// The restart delay elapsed
    Settled { generation: u64 },
    DevicesAcquired {
        generation: u64,
        devices: Result<AcquiredDevices>,
    },
    Connected {
        generation: u64,
        remote: Result<Arc<dyn RemoteSession>>,
    },
    Remote {
        generation: u64,
        event: RemoteEvent,
    },
    Timer {
        generation: u64,
        epoch: u64,
        timer: TurnTimer,
    },
    ToolResults {
        generation: u64,
        results: Vec<ToolCallResult>,
    },
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settled { generation } => f
                .debug_struct("Settled")
                .field("generation", generation)
                .finish(),
            Self::DevicesAcquired {
                generation,
                devices,
            } => f
                .debug_struct("DevicesAcquired")
                .field("generation", generation)
                .field("devices", devices)
                .finish(),
            Self::Connected { generation, remote } => f
                .debug_struct("Connected")
                .field("generation", generation)
                .field("ok", &remote.is_ok())
                .finish(),
            Self::Remote { generation, event } => f
                .debug_struct("Remote")
                .field("generation", generation)
                .field("event", event)
                .finish(),
            Self::Timer {
                generation,
                epoch,
                timer,
            } => f
                .debug_struct("Timer")
                .field("generation", generation)
                .field("epoch", epoch)
                .field("timer", timer)
                .finish(),
            Self::ToolResults {
                generation,
                results,
            } => f
                .debug_struct("ToolResults")
                .field("generation", generation)
                .field("results", results)
                .finish(),
        }
    }
}

/// Observable session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub status: SessionStatus,
    pub emotion: Emotion,
    /// Text of the turn in progress
    pub interim_text: Option<String>,
    pub transcript: Arc<[TranscriptEntry]>,
    pub camera_on: bool,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            emotion: Emotion::Neutral,
            interim_text: None,
            transcript: Arc::from(Vec::new()),
            camera_on: false,
        }
    }
}

/// Cloneable handle for driving a running engine
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    /// Queue a command
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine has exited
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::EngineStopped)
    }

    /// Start a session, replacing any running one
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine has exited
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    /// Stop the running session
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine has exited
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Turn the camera on or off
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine has exited
    pub fn toggle_camera(&self) -> Result<()> {
        self.send(Command::ToggleCamera)
    }

    /// Forget the saved conversation
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine has exited
    pub fn clear_transcript(&self) -> Result<()> {
        self.send(Command::ClearTranscript)
    }

    /// Stop the session and end the engine task
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine has already exited
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.view.borrow().status
    }

    /// Receiver that is notified on every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }
}

/// Owns session state and serializes every transition
pub struct SessionEngine {
    config: SessionConfig,
    setup: SessionSetup,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    dispatcher: ToolDispatcher,

    turn: TurnStateMachine,
    transcript: TranscriptAssembler,
    transcript_snapshot: Arc<[TranscriptEntry]>,
    resources: SessionResources,
    generation: u64,
    turn_epoch: u64,
    /// The remote reported `Open` for the current generation
    handshake_seen: bool,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    view: watch::Sender<SessionView>,
}

impl SessionEngine {
    /// Build an engine and the handle that drives it
    #[must_use]
    pub fn new(
        config: SessionConfig,
        setup: SessionSetup,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        actions: Arc<dyn Actions>,
        store: TranscriptStore,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let transcript = TranscriptAssembler::new(store);
        let transcript_snapshot: Arc<[TranscriptEntry]> = Arc::from(transcript.entries());
        let (view_tx, view_rx) = watch::channel(SessionView {
            transcript: Arc::clone(&transcript_snapshot),
            ..SessionView::default()
        });

        let engine = Self {
            config,
            setup,
            backend,
            connector,
            dispatcher: ToolDispatcher::new(actions),
            turn: TurnStateMachine::new(),
            transcript,
            transcript_snapshot,
            resources: SessionResources::default(),
            generation: 0,
            turn_epoch: 0,
            handshake_seen: false,
            events_tx,
            events_rx,
            commands_rx,
            view: view_tx,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            view: view_rx,
        };
        (engine, handle)
    }

    /// Spawn the engine on the current runtime
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        tracing::debug!("session engine running");
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                command = self.commands_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }
        self.stop();
        tracing::debug!("session engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        tracing::debug!(?command, status = %self.turn.status(), "command");
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::ToggleCamera => self.toggle_camera(),
            Command::ClearTranscript => {
                if let Err(e) = self.transcript.clear() {
                    tracing::warn!(error = %e, "failed to clear saved transcript");
                }
                self.refresh_transcript();
                self.publish();
            }
            Command::Shutdown => {}
        }
    }

    /// Begin a new session
    ///
    /// Startup runs in stages off the engine loop: settle delay, device
    /// acquisition, connect. Each stage posts its outcome back as an event
    /// tagged with the generation, so a stop at any point wins.
    fn start(&mut self) {
        if !self.turn.status().can_start() {
            tracing::info!(status = %self.turn.status(), "restarting active session");
        }
        self.end_session();
        self.turn.stop();
        self.turn.connecting();
        self.publish();

        let events = self.events_tx.clone();
        let generation = self.generation;
        let delay = self.config.restart_delay;
        self.resources.startup = Some(tokio::spawn(async move {
            // Give the previous devices time to settle before reopening them
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::Settled { generation });
        }));
    }

    fn acquire_devices(&self) {
        let backend = Arc::clone(&self.backend);
        let frame_size = self.config.capture_frame_size;
        let events = self.events_tx.clone();
        let generation = self.generation;

        // Not abortable: a stale result comes back and is released
        tokio::spawn(async move {
            let devices = tokio::task::spawn_blocking(move || open_devices(&*backend, frame_size))
                .await
                .unwrap_or_else(|e| {
                    Err(Error::DeviceAcquisition(format!("device setup failed: {e}")))
                });
            let _ = events.send(SessionEvent::DevicesAcquired {
                generation,
                devices,
            });
        });
    }

    fn connect(&mut self) {
        let connector = Arc::clone(&self.connector);
        let setup = self.setup.clone();
        let events = self.events_tx.clone();
        let generation = self.generation;
        let sink = RemoteEventSink::new(generation, events.clone());

        self.resources.startup = Some(tokio::spawn(async move {
            let remote = connector.connect(&setup, sink).await;
            let _ = events.send(SessionEvent::Connected { generation, remote });
        }));
    }

    fn stop(&mut self) {
        self.end_session();
        if self.turn.stop() {
            tracing::info!("session stopped");
        }
        self.publish();
    }

    fn fail(&mut self) {
        self.end_session();
        self.turn.fail();
        self.publish();
    }

    /// Release resources and invalidate everything in flight
    fn end_session(&mut self) {
        self.resources.teardown();
        self.transcript.discard_pending();
        self.generation += 1;
        self.turn_epoch += 1;
        self.handshake_seen = false;
    }

    fn toggle_camera(&mut self) {
        let Some(remote) = self.resources.remote.clone() else {
            tracing::debug!("camera toggle ignored; no active session");
            return;
        };

        if self.resources.camera.is_some() {
            self.resources.stop_camera();
            tracing::info!("camera off");
            self.publish();
            return;
        }

        match self.backend.open_camera() {
            Ok(camera) => {
                let camera: SharedCamera = Arc::new(Mutex::new(camera));
                self.resources.video_timer = Some(tokio::spawn(run_video_timer(
                    Arc::clone(&camera),
                    remote,
                    self.config.video_frame_interval,
                )));
                self.resources.camera = Some(camera);
                tracing::info!("camera on");
                self.publish();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to open camera");
                self.fail();
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Settled { generation } => {
                if !self.is_stale(generation) {
                    self.acquire_devices();
                }
            }
            SessionEvent::DevicesAcquired {
                generation,
                devices,
            } => {
                if self.is_stale(generation) {
                    if let Ok(devices) = devices {
                        tracing::debug!("releasing devices acquired for a stopped session");
                        devices.release();
                    }
                    return;
                }
                match devices {
                    Ok(devices) => {
                        tracing::debug!(
                            sample_rate = devices.microphone.sample_rate(),
                            "microphone open"
                        );
                        self.resources.microphone = Some(devices.microphone);
                        self.resources.pending_frames = Some(devices.frames);
                        self.resources.scheduler = Some(Arc::new(Mutex::new(
                            PlaybackScheduler::new(devices.output),
                        )));
                        self.connect();
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to start session");
                        self.fail();
                    }
                }
            }
            SessionEvent::Connected { generation, remote } => {
                if self.is_stale(generation) {
                    if let Ok(remote) = remote
                        && let Err(e) = remote.close()
                    {
                        tracing::debug!(error = %e, "failed to close stale connection");
                    }
                    return;
                }
                self.resources.startup = None;
                match remote {
                    Ok(remote) => {
                        self.resources.remote = Some(remote);
                        if self.handshake_seen {
                            self.start_capture_pump();
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to connect");
                        self.fail();
                    }
                }
            }
            SessionEvent::Remote { generation, event } => {
                if self.is_stale(generation) {
                    tracing::trace!(?event, "ignoring event from previous session");
                    return;
                }
                self.handle_remote(event);
            }
            SessionEvent::Timer {
                generation,
                epoch,
                timer,
            } => {
                if self.is_stale(generation) || epoch != self.turn_epoch {
                    return;
                }
                self.resources.turn_timer = None;
                self.handle_timer(timer);
            }
            SessionEvent::ToolResults {
                generation,
                results,
            } => {
                if self.is_stale(generation) {
                    tracing::debug!(
                        count = results.len(),
                        "discarding tool results for stopped session"
                    );
                    return;
                }
                self.send_tool_results(&results);
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.generation || !self.turn.status().is_active()
    }

    fn handle_remote(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Open => {
                self.handshake_seen = true;
                if self.turn.handshake_complete() {
                    tracing::info!("session open");
                }
                // Model audio may already have moved the turn past Connecting
                self.start_capture_pump();
                self.publish();
            }
            RemoteEvent::Message(message) => self.handle_message(message),
            RemoteEvent::Error(reason) => {
                tracing::error!(reason = %reason, "remote session error");
                self.fail();
            }
            RemoteEvent::Closed(reason) => {
                tracing::warn!(reason = %reason, "remote session closed");
                self.fail();
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::ToolCall(requests) => {
                tracing::info!(count = requests.len(), "tool call");
                self.turn.tool_call();
                self.run_tools(requests);
            }
            ServerMessage::InputTranscription(text) => {
                let suppressed = self.capture_gate().is_closed();
                if self.transcript.push_input(&text, suppressed) {
                    self.turn.input_fragment();
                }
            }
            ServerMessage::OutputTranscription(text) => {
                let emotion = self.transcript.push_output(&text);
                self.turn.output_fragment(emotion);
            }
            ServerMessage::Audio(chunk) => {
                let Some(scheduler) = &self.resources.scheduler else {
                    return;
                };
                let scheduled = match scheduler.lock() {
                    Ok(mut s) => s.schedule(&chunk),
                    Err(_) => Err(Error::Audio("playback state poisoned".to_string())),
                };
                match scheduled {
                    Ok(_) => {
                        self.turn.audio_chunk();
                    }
                    Err(e) => tracing::debug!(error = %e, "dropping audio chunk"),
                }
            }
            ServerMessage::Interrupted => {
                if let Some(scheduler) = &self.resources.scheduler
                    && let Ok(mut s) = scheduler.lock()
                {
                    s.interrupt();
                }
                self.cancel_turn_timer();
                self.turn.interrupted();
                tracing::debug!("model interrupted");
            }
            ServerMessage::TurnComplete => {
                let committed = self.transcript.complete_turn();
                if !committed.is_empty() {
                    self.refresh_transcript();
                }
                let remaining = self.playback_remaining();
                self.arm_turn_timer(TurnTimer::DrainCheck, remaining);
            }
        }
        self.publish();
    }

    fn handle_timer(&mut self, timer: TurnTimer) {
        match timer {
            TurnTimer::DrainCheck => {
                let remaining = self.playback_remaining();
                if remaining.is_zero() {
                    self.turn.begin_cooldown();
                    self.arm_turn_timer(TurnTimer::CooldownEnd, self.config.cooldown);
                } else {
                    self.arm_turn_timer(TurnTimer::DrainCheck, remaining.max(DRAIN_RECHECK));
                }
            }
            TurnTimer::CooldownEnd => {
                let speaking = !self.playback_remaining().is_zero();
                if self.turn.end_cooldown(speaking) {
                    self.publish();
                }
            }
        }
    }

    fn run_tools(&self, requests: Vec<ToolCallRequest>) {
        let dispatcher = self.dispatcher.clone();
        let events = self.events_tx.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            let batch = requests.clone();
            let outcome =
                tokio::task::spawn_blocking(move || dispatcher.dispatch_batch(&batch)).await;
            let results = match outcome {
                Ok(results) => results,
                Err(e) => {
                    tracing::error!(error = %e, "tool batch panicked");
                    requests
                        .iter()
                        .map(|r| ToolCallResult {
                            id: r.id.clone(),
                            name: r.name.clone(),
                            result: format!("Error executing tool: {e}"),
                        })
                        .collect()
                }
            };
            let _ = events.send(SessionEvent::ToolResults {
                generation,
                results,
            });
        });
    }

    fn send_tool_results(&self, results: &[ToolCallResult]) {
        let Some(remote) = &self.resources.remote else {
            return;
        };
        for result in results {
            if let Err(e) = remote.send_tool_result(result) {
                tracing::warn!(id = %result.id, error = %e, "failed to send tool result");
            }
        }
    }

    /// Start forwarding microphone frames once connected and open
    fn start_capture_pump(&mut self) {
        let (Some(remote), Some(microphone)) = (
            self.resources.remote.clone(),
            self.resources.microphone.as_ref(),
        ) else {
            return;
        };
        let sample_rate = microphone.sample_rate();
        let Some(frames) = self.resources.pending_frames.take() else {
            return;
        };
        let gate = self.capture_gate();
        self.resources.capture_pump = Some(tokio::spawn(run_capture_pump(
            frames,
            sample_rate,
            gate,
            remote,
        )));
    }

    fn capture_gate(&self) -> CaptureGate {
        CaptureGate::new(self.resources.scheduler.clone(), self.turn.cooldown_flag())
    }

    fn playback_remaining(&self) -> Duration {
        self.resources
            .scheduler
            .as_ref()
            .and_then(|s| s.lock().ok().map(|s| s.remaining()))
            .unwrap_or(Duration::ZERO)
    }

    fn arm_turn_timer(&mut self, timer: TurnTimer, after: Duration) {
        self.resources.cancel_turn_timer();
        let events = self.events_tx.clone();
        let generation = self.generation;
        let epoch = self.turn_epoch;
        self.resources.turn_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(SessionEvent::Timer {
                generation,
                epoch,
                timer,
            });
        }));
    }

    fn cancel_turn_timer(&mut self) {
        self.turn_epoch += 1;
        self.resources.cancel_turn_timer();
    }

    fn refresh_transcript(&mut self) {
        self.transcript_snapshot = Arc::from(self.transcript.entries());
    }

    fn publish(&self) {
        let view = SessionView {
            status: self.turn.status(),
            emotion: self.turn.emotion(),
            interim_text: self.transcript.interim().map(str::to_string),
            transcript: Arc::clone(&self.transcript_snapshot),
            camera_on: self.resources.camera.is_some(),
        };
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

/// Open the microphone and speaker; runs on the blocking pool
fn open_devices(backend: &dyn AudioBackend, frame_size: usize) -> Result<AcquiredDevices> {
    let (frames_tx, frames) = mpsc::unbounded_channel();
    let mut microphone = backend.open_microphone(frame_size, frames_tx)?;
    match backend.open_output() {
        Ok(output) => Ok(AcquiredDevices {
            microphone,
            frames,
            output,
        }),
        Err(e) => {
            if let Err(release) = microphone.release() {
                tracing::warn!(error = %release, "failed to release microphone");
            }
            Err(e)
        }
    }
}

/// Forward microphone frames, muting them while the gate is closed
async fn run_capture_pump(
    mut frames: mpsc::UnboundedReceiver<Vec<f32>>,
    sample_rate: u32,
    gate: CaptureGate,
    remote: Arc<dyn RemoteSession>,
) {
    let mut stale = 0usize;
    while frames.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        tracing::debug!(frames = stale, "dropped frames captured before handshake");
    }

    while let Some(frame) = frames.recv().await {
        let payload = encode(&frame, sample_rate, gate.is_closed());
        if let Err(e) = remote.send_audio(&payload) {
            tracing::trace!(error = %e, "audio frame not sent");
        }
    }
}

/// Send a camera frame every `interval`
async fn run_video_timer(camera: SharedCamera, remote: Arc<dyn RemoteSession>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let frame = match camera.lock() {
            Ok(mut c) => c.capture_jpeg(),
            Err(_) => return,
        };
        match frame {
            Ok(Some(jpeg)) => {
                if let Err(e) = remote.send_video_frame(&jpeg) {
                    tracing::trace!(error = %e, "video frame not sent");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "camera frame capture failed"),
        }
    }
}
