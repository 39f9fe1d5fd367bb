//! Session controller
//!
//! Drives the Idle → Listening → Recording → Draining cycle. The controller
//! is the only consumer of the microphone: while listening, the trigger
//! source holds it; while recording, a capture worker holds it; the handoff
//! completes before the other side starts. Connection state and inbound
//! control events arrive over channels from the connection task, so the
//! contexts share no mutable state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioFrame, AudioSettings, CaptureSource, SilenceTracker};
use crate::config::Config;
use crate::net::{ConnState, ConnectionManager, ControlEvent};
use crate::wake::TriggerSource;
use crate::Result;

/// Bounded join deadline for capture workers
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured frames buffered between the capture worker and the controller
const FRAME_BUFFER: usize = 32;

/// Delay before retrying after a trigger or capture failure
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Interval between recording heartbeat logs
const RECORD_HEARTBEAT: Duration = Duration::from_millis(500);

/// Client lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection, or between sessions
    Idle,
    /// Waiting for the wake trigger
    Listening,
    /// Streaming captured frames to the backend
    Recording,
    /// Finalizing a completed recording
    Draining,
}

/// Why the listening phase ended
enum ListenOutcome {
    Triggered,
    ConnectionLost,
    TriggerFailed,
    Shutdown,
}

/// Why a recording session ended
enum RecordingEnd {
    /// Utterance complete; the end-of-audio signal must be sent
    Drained,
    /// Connection dropped mid-recording; the far end already observed the
    /// disconnect, so no end-of-audio signal is sent
    ConnectionLost,
    /// Capture device failed
    DeviceFailed,
    /// Global stop
    Shutdown,
}

/// The coordinating state machine of the client
pub struct SessionController {
    config: Config,
    connection: Arc<ConnectionManager>,
    events: mpsc::Receiver<ControlEvent>,
    trigger: Box<dyn TriggerSource>,
    capture: Arc<dyn CaptureSource>,
    silence: SilenceTracker,
    shutdown: CancellationToken,
    state: SessionState,
}

impl SessionController {
    #[must_use]
    pub fn new(
        config: Config,
        connection: Arc<ConnectionManager>,
        events: mpsc::Receiver<ControlEvent>,
        trigger: Box<dyn TriggerSource>,
        capture: Arc<dyn CaptureSource>,
        shutdown: CancellationToken,
    ) -> Self {
        let silence = SilenceTracker::new(config.silence_threshold, config.silence_duration);
        Self {
            config,
            connection,
            events,
            trigger,
            capture,
            silence,
            shutdown,
            state: SessionState::Idle,
        }
    }

    /// Run the state machine until shutdown
    ///
    /// # Errors
    ///
    /// Currently infallible at this level; failures inside a state degrade
    /// and re-enter the cycle instead of propagating.
    pub async fn run(mut self) -> Result<()> {
        let mut conn_state = self.connection.watch_state();

        while !self.shutdown.is_cancelled() {
            match self.state {
                SessionState::Idle => {
                    if !self.await_connected(&mut conn_state).await {
                        break;
                    }
                    self.set_state(SessionState::Listening);
                }
                SessionState::Listening => match self.listen(&mut conn_state).await {
                    ListenOutcome::Triggered => self.set_state(SessionState::Recording),
                    ListenOutcome::ConnectionLost => self.set_state(SessionState::Idle),
                    ListenOutcome::TriggerFailed => self.retry_delay().await,
                    ListenOutcome::Shutdown => break,
                },
                SessionState::Recording => match self.record(&mut conn_state).await {
                    RecordingEnd::Drained => {
                        self.set_state(SessionState::Draining);
                        self.drain().await;
                        self.set_state(SessionState::Idle);
                    }
                    RecordingEnd::ConnectionLost => {
                        tracing::warn!("connection lost during recording, session discarded");
                        self.set_state(SessionState::Idle);
                    }
                    RecordingEnd::DeviceFailed => {
                        self.retry_delay().await;
                        self.set_state(SessionState::Idle);
                    }
                    RecordingEnd::Shutdown => break,
                },
                // Draining always completes inline above; this arm only
                // restates the invariant that it falls through to Idle.
                SessionState::Draining => self.set_state(SessionState::Idle),
            }
        }

        tracing::info!("session controller stopped");
        Ok(())
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "state transition");
            self.state = next;
        }
    }

    async fn retry_delay(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = tokio::time::sleep(RETRY_DELAY) => {}
        }
    }

    /// Idle: block until the connection reports Connected. Returns false on
    /// shutdown.
    async fn await_connected(&mut self, conn_state: &mut watch::Receiver<ConnState>) -> bool {
        if *conn_state.borrow_and_update() == ConnState::Connected {
            return true;
        }
        tracing::info!("waiting for connection");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return false,
                changed = conn_state.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if *conn_state.borrow_and_update() == ConnState::Connected {
                        return true;
                    }
                }
                Some(event) = self.events.recv() => log_event(&event),
            }
        }
    }

    /// Listening: wait for the wake trigger while watching connectivity
    async fn listen(&mut self, conn_state: &mut watch::Receiver<ConnState>) -> ListenOutcome {
        let listen_cancel = self.shutdown.child_token();
        let trigger_fut = self.trigger.wait_for_trigger(listen_cancel.clone());
        tokio::pin!(trigger_fut);

        loop {
            tokio::select! {
                result = &mut trigger_fut => {
                    return match result {
                        Ok(Some(event)) => {
                            tracing::info!(trigger = ?event, "trigger fired");
                            ListenOutcome::Triggered
                        }
                        Ok(None) => ListenOutcome::Shutdown,
                        Err(e) => {
                            tracing::error!(error = %e, "trigger source failed");
                            ListenOutcome::TriggerFailed
                        }
                    };
                }
                changed = conn_state.changed() => {
                    if changed.is_err() || *conn_state.borrow_and_update() != ConnState::Connected {
                        tracing::info!("connection lost while listening");
                        // Release the microphone before idling so the next
                        // listening phase can reopen it.
                        listen_cancel.cancel();
                        if tokio::time::timeout(WORKER_JOIN_TIMEOUT, &mut trigger_fut)
                            .await
                            .is_err()
                        {
                            tracing::warn!(
                                timeout_secs = WORKER_JOIN_TIMEOUT.as_secs(),
                                "wake listener did not stop in time"
                            );
                        }
                        return ListenOutcome::ConnectionLost;
                    }
                }
                Some(event) = self.events.recv() => log_event(&event),
            }
        }
    }

    /// Recording: pump frames from the capture worker to the connection,
    /// classifying silence on each one
    async fn record(&mut self, conn_state: &mut watch::Receiver<ConnState>) -> RecordingEnd {
        let (frame_tx, mut frames) = mpsc::channel::<AudioFrame>(FRAME_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let capture = Arc::clone(&self.capture);
        let settings = self.config.audio;
        let mut worker = tokio::task::spawn_blocking(move || {
            capture_frames(&*capture, &settings, &frame_tx, &worker_stop)
        });

        let session_started = Instant::now();
        let mut last_voice_activity = session_started;
        let mut last_heartbeat = session_started;
        tracing::info!("recording started");

        let end = loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break RecordingEnd::Shutdown,
                changed = conn_state.changed() => {
                    if changed.is_err() || *conn_state.borrow_and_update() != ConnState::Connected {
                        break RecordingEnd::ConnectionLost;
                    }
                }
                maybe_frame = frames.recv() => {
                    let Some(frame) = maybe_frame else {
                        // Worker exited before being asked to stop
                        break RecordingEnd::DeviceFailed;
                    };

                    let class = self.silence.classify(&frame);
                    let now = Instant::now();
                    if !class.silent {
                        last_voice_activity = now;
                    }

                    if let Err(e) = self.connection.send_binary(&frame).await {
                        tracing::warn!(error = %e, "frame send failed, aborting recording");
                        break RecordingEnd::ConnectionLost;
                    }

                    if now.duration_since(last_heartbeat) >= RECORD_HEARTBEAT {
                        tracing::debug!(
                            rms = class.rms,
                            elapsed_secs = session_started.elapsed().as_secs(),
                            "recording"
                        );
                        last_heartbeat = now;
                    }

                    if class.silent && self.silence.is_speech_timed_out(last_voice_activity, now) {
                        tracing::info!(
                            silence_secs = self.config.silence_duration.as_secs_f64(),
                            "end of utterance detected"
                        );
                        break RecordingEnd::Drained;
                    }
                    if session_started.elapsed() >= self.config.max_recording {
                        tracing::info!(
                            max_secs = self.config.max_recording.as_secs(),
                            "max recording duration reached"
                        );
                        break RecordingEnd::Drained;
                    }
                }
            }
        };

        // Stop the worker and wait for it to release the microphone. Closing
        // the receiver unblocks a worker waiting on a full frame channel.
        stop.store(true, Ordering::Relaxed);
        drop(frames);
        match tokio::time::timeout(WORKER_JOIN_TIMEOUT, &mut worker).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "capture worker failed"),
            Ok(Err(e)) => tracing::error!(error = %e, "capture worker panicked"),
            Err(_) => tracing::warn!(
                timeout_secs = WORKER_JOIN_TIMEOUT.as_secs(),
                "capture worker did not stop in time"
            ),
        }

        end
    }

    /// Draining: capture is already closed; signal end of utterance exactly
    /// once and hand the cycle back to Idle
    async fn drain(&self) {
        match self.connection.send_control(&ControlEvent::AudioEnd).await {
            Ok(()) => tracing::info!("utterance complete, awaiting response"),
            Err(e) => tracing::warn!(error = %e, "failed to send end-of-audio signal"),
        }
    }
}

/// Capture worker: owns the input stream for the life of one recording
fn capture_frames(
    capture: &dyn CaptureSource,
    settings: &AudioSettings,
    frames: &mpsc::Sender<AudioFrame>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut reader = capture.open(settings)?;
    tracing::debug!("capture stream opened for recording");

    while !stop.load(Ordering::Relaxed) {
        let frame = reader.read_frame()?;
        // Strict capture order; block rather than drop when the channel fills
        if frames.blocking_send(frame).is_err() {
            break;
        }
    }

    Ok(())
    // The reader drops here, closing the device before the next listening
    // phase opens it.
}

fn log_event(event: &ControlEvent) {
    match event {
        ControlEvent::NoSpeechDetected => {
            tracing::info!("server detected no speech in the last utterance");
        }
        ControlEvent::ErrorNotice(message) => tracing::warn!(message = %message, "server error"),
        ControlEvent::AudioEnd => tracing::debug!("unexpected audioEnd from server"),
    }
}
