//! Shared test utilities
//!
//! Fakes for the device backend and the remote connection, plus a harness
//! that runs a [`SessionEngine`] against them.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use beacon_live::config::SessionConfig;
use beacon_live::session::{SessionEngine, SessionHandle, SessionStatus, SessionView, TranscriptStore};
use beacon_live::tools::{Actions, SystemActions, ToolCallResult, ToolName};
use beacon_live::transport::{Connector, RemoteEventSink, RemoteSession, SessionSetup};
use beacon_live::voice::{
    AudioBackend, FrameSink, FrameSource, InputDevice, OutputClock, Pcm16Payload, VirtualClock,
};
use beacon_live::{Error, Result};

/// Native microphone rate reported by the fake backend
pub const MIC_RATE: u32 = 48_000;

/// Something the engine sent to the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Audio(Pcm16Payload),
    Video(String),
    ToolResult(ToolCallResult),
    Close,
}

/// Remote session that reports everything it is asked to send
pub struct FakeRemote {
    sent: mpsc::UnboundedSender<Sent>,
    pub closed: AtomicBool,
}

impl FakeRemote {
    /// Records even after close so tests can see late sends
    fn record(&self, sent: Sent) -> Result<()> {
        let _ = self.sent.send(sent);
        Ok(())
    }
}

impl RemoteSession for FakeRemote {
    fn send_audio(&self, payload: &Pcm16Payload) -> Result<()> {
        self.record(Sent::Audio(payload.clone()))
    }

    fn send_video_frame(&self, jpeg_base64: &str) -> Result<()> {
        self.record(Sent::Video(jpeg_base64.to_string()))
    }

    fn send_tool_result(&self, result: &ToolCallResult) -> Result<()> {
        self.record(Sent::ToolResult(result.clone()))
    }

    fn close(&self) -> Result<()> {
        let _ = self.sent.send(Sent::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One connection the engine opened
pub struct Connection {
    pub sink: RemoteEventSink,
    pub remote: Arc<FakeRemote>,
    pub sent: mpsc::UnboundedReceiver<Sent>,
}

impl Connection {
    /// Next message sent to the remote
    pub async fn next_sent(&mut self) -> Sent {
        self.sent.recv().await.expect("remote channel closed")
    }

    /// Next audio frame sent to the remote, skipping anything else
    pub async fn next_audio(&mut self) -> Pcm16Payload {
        loop {
            if let Sent::Audio(payload) = self.next_sent().await {
                return payload;
            }
        }
    }

    /// Next tool result sent to the remote, skipping anything else
    pub async fn next_tool_result(&mut self) -> ToolCallResult {
        loop {
            if let Sent::ToolResult(result) = self.next_sent().await {
                return result;
            }
        }
    }

    /// Everything sent so far without waiting
    pub fn drain_sent(&mut self) -> Vec<Sent> {
        let mut sent = Vec::new();
        while let Ok(s) = self.sent.try_recv() {
            sent.push(s);
        }
        sent
    }
}

/// Connector handing each new connection to the test
pub struct FakeConnector {
    connections: mpsc::UnboundedSender<Connection>,
    pub setups: Mutex<Vec<SessionSetup>>,
    pub refuse: AtomicBool,
    /// Never finish connecting
    pub stall: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Connection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            connections: tx,
            setups: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
            stall: AtomicBool::new(false),
        });
        (connector, rx)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        setup: &SessionSetup,
        events: RemoteEventSink,
    ) -> Result<Arc<dyn RemoteSession>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Remote("connection refused".to_string()));
        }
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.setups.lock().unwrap().push(setup.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let remote = Arc::new(FakeRemote {
            sent: tx,
            closed: AtomicBool::new(false),
        });
        let _ = self.connections.send(Connection {
            sink: events,
            remote: Arc::clone(&remote),
            sent: rx,
        });
        Ok(remote)
    }
}

pub struct FakeMic {
    released: Arc<AtomicUsize>,
}

impl InputDevice for FakeMic {
    fn sample_rate(&self) -> u32 {
        MIC_RATE
    }

    fn release(&mut self) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeCamera {
    released: Arc<AtomicUsize>,
}

impl FrameSource for FakeCamera {
    fn capture_jpeg(&mut self) -> Result<Option<String>> {
        Ok(Some("/9j/fake".to_string()))
    }

    fn release(&mut self) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Device backend with a virtual speaker and a microphone fed by the test
#[derive(Default)]
pub struct FakeBackend {
    pub deny_microphone: AtomicBool,
    pub deny_camera: AtomicBool,
    pub mic_opened: AtomicUsize,
    pub mic_released: Arc<AtomicUsize>,
    pub camera_released: Arc<AtomicUsize>,
    mic_sinks: Mutex<Vec<FrameSink>>,
    clocks: Mutex<Vec<Arc<VirtualClock>>>,
}

impl FakeBackend {
    /// Sink of the most recently opened microphone
    pub fn microphone(&self) -> FrameSink {
        self.mic_sinks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("microphone was never opened")
    }

    /// Clock of the most recently opened speaker
    pub fn clock(&self) -> Arc<VirtualClock> {
        self.clocks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("speaker was never opened")
    }
}

impl AudioBackend for FakeBackend {
    fn open_microphone(&self, _frame_size: usize, sink: FrameSink) -> Result<Box<dyn InputDevice>> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(Error::DeviceAcquisition("permission denied".to_string()));
        }
        self.mic_opened.fetch_add(1, Ordering::SeqCst);
        self.mic_sinks.lock().unwrap().push(sink);
        Ok(Box::new(FakeMic {
            released: Arc::clone(&self.mic_released),
        }))
    }

    fn open_output(&self) -> Result<Arc<dyn OutputClock>> {
        let clock = Arc::new(VirtualClock::new());
        self.clocks.lock().unwrap().push(Arc::clone(&clock));
        Ok(clock)
    }

    fn open_camera(&self) -> Result<Box<dyn FrameSource>> {
        if self.deny_camera.load(Ordering::SeqCst) {
            return Err(Error::DeviceAcquisition("no camera".to_string()));
        }
        Ok(Box::new(FakeCamera {
            released: Arc::clone(&self.camera_released),
        }))
    }
}

/// A running engine wired to fakes
pub struct Harness {
    pub handle: SessionHandle,
    pub backend: Arc<FakeBackend>,
    pub connector: Arc<FakeConnector>,
    pub connections: mpsc::UnboundedReceiver<Connection>,
    pub engine: JoinHandle<()>,
}

pub fn setup() -> SessionSetup {
    SessionSetup {
        model: "models/test-live".to_string(),
        voice: "Kore".to_string(),
        instructions: "Be brief.".to_string(),
        tools: ToolName::ALL.to_vec(),
    }
}

/// Harness with default session timing and system actions
pub fn harness() -> Harness {
    harness_with(Arc::new(SystemActions), TranscriptStore::in_memory())
}

pub fn harness_with(actions: Arc<dyn Actions>, store: TranscriptStore) -> Harness {
    let backend = Arc::new(FakeBackend::default());
    let (connector, connections) = FakeConnector::new();
    let (engine, handle) = SessionEngine::new(
        SessionConfig::default(),
        setup(),
        Arc::clone(&backend) as Arc<dyn AudioBackend>,
        Arc::clone(&connector) as Arc<dyn Connector>,
        actions,
        store,
    );
    Harness {
        handle,
        backend,
        connector,
        connections,
        engine: engine.spawn(),
    }
}

impl Harness {
    /// Start a session and wait until it has connected
    pub async fn connect(&mut self) -> Connection {
        self.handle.start().unwrap();
        self.connections.recv().await.expect("engine never connected")
    }

    /// Start a session and complete the handshake
    pub async fn open(&mut self) -> Connection {
        let conn = self.connect().await;
        conn.sink.open();
        self.wait_for(SessionStatus::Listening).await;
        conn
    }

    /// Wait until the published status equals `status`
    pub async fn wait_for(&self, status: SessionStatus) -> SessionView {
        self.wait_until(|v| v.status == status).await
    }

    /// Wait until the published view satisfies `f`
    pub async fn wait_until(&self, f: impl FnMut(&SessionView) -> bool) -> SessionView {
        let mut rx = self.handle.subscribe();
        let view = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(f))
            .await
            .expect("timed out waiting for session view")
            .expect("engine stopped")
            .clone();
        view
    }
}

/// Base64 PCM16 chunk of `samples` silent samples
pub fn pcm_chunk(samples: usize) -> String {
    B64.encode(vec![0u8; samples * 2])
}

/// Decode an outbound payload into samples
pub fn payload_samples(payload: &Pcm16Payload) -> Vec<i16> {
    B64.decode(&payload.data)
        .unwrap()
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
