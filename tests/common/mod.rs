//! Shared test utilities: in-memory transport, fake devices, manual clock

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use live_bridge::audio::{
    AudioSink, AudioSource, DeviceGuard, OpenedOutput, OpenedSource, OutputDevice, PlaybackChunk,
    PlaybackClock,
};
use live_bridge::config::CapturePolicy;
use live_bridge::session::{ClientMessage, Connector, ServerMessage, Transport};
use live_bridge::{Config, Error, Result, SessionSnapshot};
use tokio::sync::{mpsc, watch};
use url::Url;

/// Configuration that never touches real devices or the network
#[must_use]
pub fn test_config(capture: CapturePolicy) -> Config {
    let mut config = Config::default();
    config.session.endpoint = "ws://127.0.0.1:9/live".to_string();
    config.session.capture = capture;
    config.session.connect_timeout = Duration::from_secs(5);
    config.session.tool_timeout = Duration::from_secs(2);
    config
}

/// What the mock peer does with a setup message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupReply {
    Ack,
    Never,
}

enum Inbound {
    Message(String),
    Close,
}

#[derive(Default)]
struct PeerState {
    sent: Mutex<Vec<ClientMessage>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// The remote end of every transport a `MockConnector` opens
#[derive(Clone)]
pub struct MockPeer {
    state: Arc<PeerState>,
}

impl MockPeer {
    /// Send a raw JSON message to the current session
    pub fn push(&self, json: &str) {
        if let Some(tx) = self.state.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(Inbound::Message(json.to_string()));
        }
    }

    /// Send a parsed value to the current session
    pub fn push_value(&self, value: &serde_json::Value) {
        self.push(&value.to_string());
    }

    /// Close the connection from the server side
    pub fn close(&self) {
        if let Some(tx) = self.state.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(Inbound::Close);
        }
    }

    /// Every message the client sent, across connections
    #[must_use]
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Tool results the client sent, in order
    #[must_use]
    pub fn tool_responses(&self) -> Vec<live_bridge::ToolResult> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::ToolResponse(r) => Some(r.function_responses),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Text turns the client sent, in order
    #[must_use]
    pub fn text_turns(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::ClientContent(c) => c
                    .turns
                    .into_iter()
                    .flat_map(|t| t.parts)
                    .find_map(|p| p.text),
                _ => None,
            })
            .collect()
    }

    /// Number of transports opened
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of transports closed by the client
    #[must_use]
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Poll until `check` passes or two seconds elapse
    pub async fn wait_until(&self, check: impl Fn(&Self) -> bool) {
        for _ in 0..200 {
            if check(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time; sent = {:?}", self.sent());
    }
}

/// Connector handing out in-memory transports
pub struct MockConnector {
    reply: SetupReply,
    peer: MockPeer,
}

impl MockConnector {
    #[must_use]
    pub fn new(reply: SetupReply) -> (Arc<Self>, MockPeer) {
        let peer = MockPeer {
            state: Arc::new(PeerState::default()),
        };
        (
            Arc::new(Self {
                reply,
                peer: peer.clone(),
            }),
            peer,
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &Url) -> Result<Box<dyn Transport>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.peer.state.inbound.lock().unwrap() = Some(tx.clone());
        self.peer.state.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockTransport {
            reply: self.reply,
            own: tx,
            inbound: rx,
            state: Arc::clone(&self.peer.state),
            closed: false,
        }))
    }
}

struct MockTransport {
    reply: SetupReply,
    own: mpsc::UnboundedSender<Inbound>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    state: Arc<PeerState>,
    closed: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        if self.closed {
            return Err(Error::Transport("closed".to_string()));
        }
        self.state.sent.lock().unwrap().push(message.clone());

        if matches!(message, ClientMessage::Setup(_)) && self.reply == SetupReply::Ack {
            let _ = self
                .own
                .send(Inbound::Message(r#"{"setupComplete":{}}"#.to_string()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        if self.closed {
            return None;
        }
        match self.inbound.recv().await? {
            Inbound::Message(json) => Some(ServerMessage::parse(json.as_bytes())),
            Inbound::Close => {
                self.closed = true;
                None
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Microphone stand-in that counts concurrent acquisitions
#[derive(Default)]
pub struct FakeSource {
    pub available: bool,
    held: Arc<AtomicUsize>,
    max_held: Arc<AtomicUsize>,
    opens: AtomicUsize,
    tx: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
}

impl FakeSource {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Devices currently held
    #[must_use]
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Highest number of devices ever held at once
    #[must_use]
    pub fn max_held(&self) -> usize {
        self.max_held.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Feed one block of mono samples into the open stream
    pub async fn push(&self, block: Vec<f32>) {
        let tx = self.tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(block).await;
        }
    }
}

impl AudioSource for FakeSource {
    fn open(&self, sample_rate: u32, tx: mpsc::Sender<Vec<f32>>) -> Result<OpenedSource> {
        if !self.available {
            return Err(Error::DeviceUnavailable("no input device available".to_string()));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_held.fetch_max(now, Ordering::SeqCst);
        *self.tx.lock().unwrap() = Some(tx);

        let held = Arc::clone(&self.held);
        Ok(OpenedSource {
            guard: DeviceGuard::new(move || {
                held.fetch_sub(1, Ordering::SeqCst);
            }),
            sample_rate,
        })
    }
}

/// Clock advanced by hand
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn set(&self, now: Duration) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }
}

/// Sink that records what it was asked to play
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub scheduled: Arc<Mutex<Vec<(Duration, Duration)>>>,
    pub cancels: Arc<AtomicUsize>,
}

impl AudioSink for RecordingSink {
    fn schedule(&mut self, start: Duration, chunk: &PlaybackChunk) {
        self.scheduled
            .lock()
            .unwrap()
            .push((start, chunk.duration));
    }

    fn cancel_all(&mut self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Speaker stand-in over a manual clock
#[derive(Clone, Default)]
pub struct FakeOutput {
    pub clock: ManualClock,
    pub sink: RecordingSink,
    pub available: bool,
    held: Arc<AtomicUsize>,
}

impl FakeOutput {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

impl OutputDevice for FakeOutput {
    fn open(&self) -> Result<OpenedOutput> {
        if !self.available {
            return Err(Error::DeviceUnavailable("no output device available".to_string()));
        }

        self.held.fetch_add(1, Ordering::SeqCst);
        let held = Arc::clone(&self.held);
        Ok(OpenedOutput {
            clock: Arc::new(self.clock.clone()),
            sink: Box::new(self.sink.clone()),
            guard: DeviceGuard::new(move || {
                held.fetch_sub(1, Ordering::SeqCst);
            }),
            sample_rate: 24_000,
        })
    }
}

/// Wait until the snapshot satisfies `check`
pub async fn wait_snapshot(
    rx: &mut watch::Receiver<SessionSnapshot>,
    check: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(check))
        .await
        .expect("snapshot condition timed out")
        .expect("snapshot channel closed")
        .clone()
}
