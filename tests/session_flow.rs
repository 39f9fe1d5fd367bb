//! End-to-end session flow tests over mock transport and capture
//!
//! The mock peer stands in for the backend: it accepts connections, records
//! every message the client sends, and can close the socket to simulate
//! network loss. The mock capture source scripts frame levels so silence
//! detection runs against deterministic audio.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_test::assert_ok;

use lyra_client::audio::{AudioFrame, AudioSettings, CaptureSource, FrameReader};
use lyra_client::net::{
    ConnectionManager, DuplexPair, MessageSink, MessageStream, Transport, WireMessage,
};
use lyra_client::wake::{TriggerEvent, TriggerSource};
use lyra_client::{Config, Error, SessionController};

/// Simulated frame period; short enough to keep tests fast
const FRAME_PACE: Duration = Duration::from_millis(10);

fn test_config() -> Config {
    Config {
        endpoint: "ws://backend.test:3000".to_string(),
        wake_word_enabled: false,
        silence_duration: Duration::from_millis(150),
        connect_timeout: Duration::from_millis(500),
        reconnect_backoff: Duration::from_millis(50),
        ..Config::default()
    }
}

// ---------------------------------------------------------------------------
// Mock transport

/// Test-side view of one accepted connection
struct Peer {
    /// Everything the client sent on this connection
    outbound: mpsc::UnboundedReceiver<WireMessage>,
    /// Inject server-to-client traffic; dropping it closes the connection
    #[allow(dead_code)]
    inbound_tx: mpsc::UnboundedSender<lyra_client::Result<WireMessage>>,
}

struct MockTransport {
    accepted_tx: mpsc::UnboundedSender<Peer>,
    connects: Arc<AtomicUsize>,
}

impl MockTransport {
    fn new() -> (Self, mpsc::UnboundedReceiver<Peer>, Arc<AtomicUsize>) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let connects = Arc::new(AtomicUsize::new(0));
        (
            Self {
                accepted_tx,
                connects: Arc::clone(&connects),
            },
            accepted_rx,
            connects,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str, _timeout: Duration) -> lyra_client::Result<DuplexPair> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.accepted_tx.send(Peer {
            outbound: out_rx,
            inbound_tx: in_tx,
        });
        Ok((Box::new(MockSink { tx: out_tx }), Box::new(MockStream { rx: in_rx })))
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<WireMessage>,
}

#[async_trait]
impl MessageSink for MockSink {
    async fn send(&mut self, msg: WireMessage) -> lyra_client::Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::Connection("peer closed".to_string()))
    }

    async fn close(&mut self) -> lyra_client::Result<()> {
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<lyra_client::Result<WireMessage>>,
}

#[async_trait]
impl MessageStream for MockStream {
    async fn next_message(&mut self) -> Option<lyra_client::Result<WireMessage>> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Mock capture

/// Scripted capture: each open() pops the next script of constant-amplitude
/// frames; exhausted scripts continue with silent frames forever
struct MockCapture {
    scripts: Mutex<VecDeque<Vec<i16>>>,
    concurrent: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
}

impl MockCapture {
    fn new(scripts: Vec<Vec<i16>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn open_streams(&self) -> usize {
        self.concurrent.load(Ordering::SeqCst)
    }

    fn max_open_streams(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

impl CaptureSource for MockCapture {
    fn open(&self, settings: &AudioSettings) -> lyra_client::Result<Box<dyn FrameReader>> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let now_open = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now_open, Ordering::SeqCst);
        Ok(Box::new(MockReader {
            script,
            pos: 0,
            frame_size: settings.frame_size,
            concurrent: Arc::clone(&self.concurrent),
        }))
    }
}

struct MockReader {
    script: Vec<i16>,
    pos: usize,
    frame_size: usize,
    concurrent: Arc<AtomicUsize>,
}

impl FrameReader for MockReader {
    fn read_frame(&mut self) -> lyra_client::Result<AudioFrame> {
        std::thread::sleep(FRAME_PACE);
        let value = self.script.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        Ok(AudioFrame::new(vec![value; self.frame_size]))
    }
}

impl Drop for MockReader {
    fn drop(&mut self) {
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Mock trigger

/// Fires immediately a fixed number of times, then waits for cancellation
struct ScriptedTrigger {
    remaining: AtomicUsize,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTrigger {
    fn new(fires: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(fires),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle for asserting how many listening phases were entered
    fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl TriggerSource for ScriptedTrigger {
    async fn wait_for_trigger(
        &self,
        cancel: CancellationToken,
    ) -> lyra_client::Result<Option<TriggerEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fire = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fire {
            return Ok(Some(TriggerEvent::Manual));
        }
        cancel.cancelled().await;
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Helpers

fn first_sample(data: &[u8]) -> i16 {
    i16::from_le_bytes([data[0], data[1]])
}

async fn recv_message(peer: &mut Peer) -> WireMessage {
    tokio::time::timeout(Duration::from_secs(5), peer.outbound.recv())
        .await
        .expect("timed out waiting for a message from the client")
        .expect("client hung up unexpectedly")
}

/// Read messages until the first text (control) message; returns the binary
/// payload prefix and the control text
async fn recv_until_control(peer: &mut Peer) -> (Vec<Vec<u8>>, String) {
    let mut binaries = Vec::new();
    loop {
        match recv_message(peer).await {
            WireMessage::Binary(data) => binaries.push(data),
            WireMessage::Text(text) => return (binaries, text),
        }
    }
}

struct Harness {
    shutdown: CancellationToken,
    controller_task: tokio::task::JoinHandle<lyra_client::Result<()>>,
    connection_task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(
        config: Config,
        transport: MockTransport,
        capture: Arc<MockCapture>,
        trigger: ScriptedTrigger,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (connection, events, connection_task) =
            ConnectionManager::spawn(Arc::new(transport), &config, shutdown.clone());
        let controller = SessionController::new(
            config,
            connection,
            events,
            Box::new(trigger),
            capture,
            shutdown.clone(),
        );
        let controller_task = tokio::spawn(controller.run());
        Self {
            shutdown,
            controller_task,
            connection_task,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), self.controller_task)
            .await
            .expect("controller did not stop")
            .expect("controller panicked");
        tokio_test::assert_ok!(result);
        tokio::time::timeout(Duration::from_secs(5), self.connection_task)
            .await
            .expect("connection task did not stop")
            .expect("connection task panicked");
    }
}

// ---------------------------------------------------------------------------
// Tests

#[tokio::test]
async fn test_frames_arrive_in_order_terminated_by_one_audio_end() {
    let (transport, mut accepted, _connects) = MockTransport::new();
    let script: Vec<i16> = vec![600, 601, 602, 603, 604];
    let capture = Arc::new(MockCapture::new(vec![script.clone()]));
    let harness = Harness::start(
        test_config(),
        transport,
        Arc::clone(&capture),
        ScriptedTrigger::new(1),
    );

    let mut peer = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .expect("client never connected")
        .unwrap();

    let (binaries, control) = recv_until_control(&mut peer).await;
    assert_eq!(control, r#"{"event":"audioEnd"}"#);

    // The voiced script arrives first, in capture order, with no duplicates
    // or gaps; silent padding follows until the silence window elapses.
    let ids: Vec<i16> = binaries.iter().map(|data| first_sample(data)).collect();
    assert!(
        ids.len() >= script.len(),
        "expected at least {} frames, got {}",
        script.len(),
        ids.len()
    );
    assert_eq!(&ids[..script.len()], &script[..]);
    assert!(ids[script.len()..].iter().all(|&v| v == 0));

    // No second control message follows
    let extra = tokio::time::timeout(Duration::from_millis(400), async {
        loop {
            match peer.outbound.recv().await {
                Some(WireMessage::Text(text)) => break Some(text),
                Some(WireMessage::Binary(_)) => {}
                None => break None,
            }
        }
    })
    .await;
    assert!(
        !matches!(extra, Ok(Some(_))),
        "unexpected extra control message: {extra:?}"
    );

    harness.stop().await;
    assert_eq!(capture.open_streams(), 0, "capture stream leaked");
}

#[tokio::test]
async fn test_connection_loss_during_recording_sends_no_audio_end() {
    let (transport, mut accepted, connects) = MockTransport::new();
    // Long voiced script so the recording is still active when the link dies
    let script: Vec<i16> = (600..700).collect();
    let capture = Arc::new(MockCapture::new(vec![script]));
    let trigger = ScriptedTrigger::new(1);
    let listen_phases = trigger.call_counter();
    let harness = Harness::start(test_config(), transport, Arc::clone(&capture), trigger);

    let mut peer = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .expect("client never connected")
        .unwrap();

    // Wait until the recording is clearly in flight
    for _ in 0..3 {
        let msg = recv_message(&mut peer).await;
        assert!(matches!(msg, WireMessage::Binary(_)));
    }

    // Server closes the connection mid-recording
    drop(peer.inbound_tx);

    // Drain the rest of this connection's traffic: binary frames may still be
    // in flight, but no audioEnd must ever arrive.
    loop {
        match tokio::time::timeout(Duration::from_secs(5), peer.outbound.recv())
            .await
            .expect("peer channel did not settle")
        {
            Some(WireMessage::Text(text)) => panic!("control message after disconnect: {text}"),
            Some(WireMessage::Binary(_)) => {}
            None => break,
        }
    }

    // The capture stream is released before the controller idles
    let deadline = Instant::now() + Duration::from_secs(5);
    while capture.open_streams() != 0 {
        assert!(Instant::now() < deadline, "capture stream never closed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The client reconnects on its own after the backoff and resumes
    // listening without a restart.
    let _peer2 = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .expect("client never reconnected")
        .unwrap();
    assert!(connects.load(Ordering::SeqCst) >= 2);

    let deadline = Instant::now() + Duration::from_secs(5);
    while listen_phases.load(Ordering::SeqCst) < 2 {
        assert!(
            Instant::now() < deadline,
            "controller never re-entered listening after the reconnect"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_drain_fires_only_after_the_silence_window() {
    let silence_window = Duration::from_millis(300);
    let config = Config {
        silence_duration: silence_window,
        ..test_config()
    };

    // One voiced frame, then scripted silence well past the window
    let capture = Arc::new(MockCapture::new(vec![vec![800]]));
    let (transport, mut accepted, _connects) = MockTransport::new();
    let harness = Harness::start(config, transport, Arc::clone(&capture), ScriptedTrigger::new(1));

    let mut peer = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .expect("client never connected")
        .unwrap();

    // Timestamp the last voiced frame as the peer observes it
    let mut voiced_seen_at = None;
    let mut audio_ends = 0;
    let finished_at = loop {
        match recv_message(&mut peer).await {
            WireMessage::Binary(data) => {
                if first_sample(&data) == 800 {
                    voiced_seen_at = Some(Instant::now());
                }
            }
            WireMessage::Text(text) => {
                assert_eq!(text, r#"{"event":"audioEnd"}"#);
                audio_ends += 1;
                break Instant::now();
            }
        }
    };

    let voiced_seen_at = voiced_seen_at.expect("voiced frame never arrived");
    let elapsed = finished_at.duration_since(voiced_seen_at);
    assert!(
        elapsed >= silence_window - Duration::from_millis(10),
        "drained after only {elapsed:?}, window is {silence_window:?}"
    );
    assert_eq!(audio_ends, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_back_to_back_triggers_never_overlap_recordings() {
    let sessions: usize = 3;
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let scripts: Vec<Vec<i16>> = (0..sessions)
        .map(|i| vec![700 + i as i16, 701 + i as i16])
        .collect();
    let capture = Arc::new(MockCapture::new(scripts));
    let (transport, mut accepted, _connects) = MockTransport::new();
    let harness = Harness::start(
        test_config(),
        transport,
        Arc::clone(&capture),
        ScriptedTrigger::new(sessions),
    );

    let mut peer = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .expect("client never connected")
        .unwrap();

    for _ in 0..sessions {
        let (_binaries, control) = recv_until_control(&mut peer).await;
        assert_eq!(control, r#"{"event":"audioEnd"}"#);
    }

    assert_eq!(
        capture.max_open_streams(),
        1,
        "two capture streams were open at once"
    );

    harness.stop().await;
    assert_eq!(capture.open_streams(), 0);
}
