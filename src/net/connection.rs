//! Connection lifecycle management
//!
//! One duplex connection to the backend per client lifetime, re-established
//! with a fixed backoff whenever it drops. The connection task is the sole
//! writer of [`ConnState`]; other contexts observe it through a watch channel
//! and send through handles that re-check connectivity before writing.
//!
//! Inbound binary messages are complete response clips and are played inline
//! in the receive loop; inbound text messages are parsed as JSON control
//! events and forwarded to the session controller.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{ControlEvent, WireMessage};
use super::transport::{MessageSink, MessageStream, Transport};
use crate::Config;
use crate::audio::{AudioFrame, AudioSettings, Playback, pcm_from_le_bytes};
use crate::{Error, Result};

/// Outbound messages buffered per connection before senders block
const OUTBOUND_BUFFER: usize = 64;

/// Control events buffered towards the session controller
const EVENT_BUFFER: usize = 16;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

/// Handle to the connection task
///
/// Cheap to share; `send_binary`/`send_control` fail fast with
/// [`Error::NotConnected`] while the connection is down.
pub struct ConnectionManager {
    state_rx: watch::Receiver<ConnState>,
    outbound: Mutex<Option<mpsc::Sender<WireMessage>>>,
}

impl ConnectionManager {
    /// Spawn the connection task
    ///
    /// Returns the shared handle, the stream of recognized inbound control
    /// events, and the task handle for the shutdown join.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<ControlEvent>, JoinHandle<()>) {
        let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let manager = Arc::new(Self {
            state_rx,
            outbound: Mutex::new(None),
        });

        let task = ConnectionTask {
            manager: Arc::clone(&manager),
            transport,
            endpoint: config.endpoint.clone(),
            connect_timeout: config.connect_timeout,
            backoff: config.reconnect_backoff,
            audio: config.audio,
            state_tx,
            event_tx,
            shutdown,
            playback: None,
        };
        let handle = tokio::spawn(task.run());

        (manager, event_rx, handle)
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for state transitions
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnState> {
        self.state_rx.clone()
    }

    /// Send one PCM frame as a binary message
    ///
    /// Blocks when the outbound buffer is full (back-pressure, never drop).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] while the connection is down.
    pub async fn send_binary(&self, frame: &AudioFrame) -> Result<()> {
        self.send(WireMessage::Binary(frame.to_le_bytes())).await
    }

    /// Serialize and send one control event
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] while the connection is down.
    pub async fn send_control(&self, event: &ControlEvent) -> Result<()> {
        self.send(WireMessage::Text(event.to_json()?)).await
    }

    async fn send(&self, msg: WireMessage) -> Result<()> {
        if self.state() != ConnState::Connected {
            return Err(Error::NotConnected);
        }
        // Clone the sender so the lock is never held across the await
        let tx = self
            .outbound
            .lock()
            .map_err(|_| Error::NotConnected)?
            .clone()
            .ok_or(Error::NotConnected)?;
        tx.send(msg).await.map_err(|_| Error::NotConnected)
    }

    fn install_sender(&self, tx: Option<mpsc::Sender<WireMessage>>) {
        if let Ok(mut guard) = self.outbound.lock() {
            *guard = tx;
        }
    }
}

/// State owned exclusively by the connection task
struct ConnectionTask {
    manager: Arc<ConnectionManager>,
    transport: Arc<dyn Transport>,
    endpoint: String,
    connect_timeout: std::time::Duration,
    backoff: std::time::Duration,
    audio: AudioSettings,
    state_tx: watch::Sender<ConnState>,
    event_tx: mpsc::Sender<ControlEvent>,
    shutdown: CancellationToken,
    /// Opened lazily on the first inbound clip; reset after a play failure
    playback: Option<Arc<Playback>>,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let _ = self.state_tx.send(ConnState::Connecting);
            tracing::info!(url = %self.endpoint, "connecting");

            match self
                .transport
                .connect(&self.endpoint, self.connect_timeout)
                .await
            {
                Ok((sink, stream)) => {
                    // A fresh outbound queue per connection; frames queued for
                    // a dead connection are never replayed on the next one.
                    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
                    self.manager.install_sender(Some(tx));
                    let _ = self.state_tx.send(ConnState::Connected);
                    tracing::info!("connected");

                    self.run_connected(sink, stream, rx).await;

                    self.manager.install_sender(None);
                    let _ = self.state_tx.send(ConnState::Disconnected);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connect failed");
                    let _ = self.state_tx.send(ConnState::Disconnected);
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }
            tracing::info!(
                backoff_secs = self.backoff.as_secs_f64(),
                "reconnecting after backoff"
            );
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(self.backoff) => {}
            }
        }

        let _ = self.state_tx.send(ConnState::Disconnected);
        tracing::debug!("connection task exiting");
    }

    /// Pump one established connection until it fails, the peer closes, or
    /// shutdown is requested.
    async fn run_connected(
        &mut self,
        mut sink: Box<dyn MessageSink>,
        mut stream: Box<dyn MessageStream>,
        mut outbound_rx: mpsc::Receiver<WireMessage>,
    ) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    if let Err(e) = sink.close().await {
                        tracing::debug!(error = %e, "close failed during shutdown");
                    }
                    return;
                }
                Some(msg) = outbound_rx.recv() => {
                    if let Err(e) = sink.send(msg).await {
                        tracing::warn!(error = %e, "send failed, dropping connection");
                        return;
                    }
                }
                inbound = stream.next_message() => match inbound {
                    Some(Ok(WireMessage::Binary(data))) => self.play_clip(&data).await,
                    Some(Ok(WireMessage::Text(text))) => self.dispatch_control(&text).await,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "receive failed, dropping connection");
                        return;
                    }
                    None => {
                        tracing::info!("connection closed by server");
                        return;
                    }
                }
            }
        }
    }

    /// Play one response clip inline; the receive loop waits for it
    async fn play_clip(&mut self, data: &[u8]) {
        if self.playback.is_none() {
            match Playback::open(&self.audio) {
                Ok(playback) => self.playback = Some(Arc::new(playback)),
                Err(e) => {
                    tracing::error!(error = %e, "cannot open playback, skipping clip");
                    return;
                }
            }
        }
        let Some(device) = self.playback.clone() else {
            return;
        };

        let clip = pcm_from_le_bytes(data);
        tracing::debug!(samples = clip.len(), "playing response clip");

        match tokio::task::spawn_blocking(move || device.play(&clip)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "playback failed, skipping clip");
                // Re-probe the device on the next clip
                self.playback = None;
            }
            Err(e) => tracing::error!(error = %e, "playback task panicked"),
        }
    }

    async fn dispatch_control(&self, text: &str) {
        match ControlEvent::parse(text) {
            Ok(Some(event)) => {
                tracing::debug!(event = ?event, "control event received");
                if self.event_tx.send(event).await.is_err() {
                    tracing::debug!("event receiver dropped");
                }
            }
            Ok(None) => tracing::debug!(text, "ignoring unrecognized control message"),
            Err(e) => tracing::warn!(error = %e, text, "discarding malformed control message"),
        }
    }
}
