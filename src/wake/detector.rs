//! Wake word detection over recognizer decodes
//!
//! The recognizer capability is a trait so the matching logic and the
//! listening loop are independent of any particular engine.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{TriggerEvent, TriggerSource};
use crate::audio::{AudioFrame, AudioSettings, CaptureSource};
use crate::{Error, Result};

/// Interval between "still listening" heartbeat logs
const LISTEN_HEARTBEAT: Duration = Duration::from_secs(5);

/// Decoder output for one audio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decode {
    /// Utterance finalized with this text
    Final(String),
    /// In-progress hypothesis
    Partial(String),
}

/// The local speech recognizer capability: feed PCM frames, get back decoded
/// text or an in-progress hypothesis
pub trait Recognizer: Send {
    /// Feed one frame and return the current decode
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recognizer`] when the engine rejects the audio.
    fn accept_frame(&mut self, frame: &AudioFrame) -> Result<Decode>;

    /// Clear accumulated decode state
    fn reset(&mut self);
}

/// Matches the configured wake phrase in decoded text
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    phrase: String,
}

impl WakeWordDetector {
    #[must_use]
    pub fn new(phrase: &str) -> Self {
        Self {
            phrase: phrase.trim().to_lowercase(),
        }
    }

    /// Check one decode for the wake phrase: case-insensitive substring over
    /// both partial and final hypotheses. Returns the text that matched.
    #[must_use]
    pub fn scan(&self, decode: &Decode) -> Option<String> {
        let text = match decode {
            Decode::Final(text) | Decode::Partial(text) => text,
        };
        let normalized = text.to_lowercase();
        normalized.contains(&self.phrase).then_some(normalized)
    }

    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }
}

/// Trigger source that listens on the microphone for the wake phrase
pub struct WakeWordTrigger {
    detector: WakeWordDetector,
    // Locked for the duration of one listening phase; decode state carries a
    // fresh reset at the start of each phase.
    recognizer: Arc<Mutex<Box<dyn Recognizer>>>,
    capture: Arc<dyn CaptureSource>,
    audio: AudioSettings,
}

impl WakeWordTrigger {
    #[must_use]
    pub fn new(
        detector: WakeWordDetector,
        recognizer: Box<dyn Recognizer>,
        capture: Arc<dyn CaptureSource>,
        audio: AudioSettings,
    ) -> Self {
        Self {
            detector,
            recognizer: Arc::new(Mutex::new(recognizer)),
            capture,
            audio,
        }
    }
}

#[async_trait]
impl TriggerSource for WakeWordTrigger {
    async fn wait_for_trigger(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<TriggerEvent>> {
        let detector = self.detector.clone();
        let recognizer = Arc::clone(&self.recognizer);
        let capture = Arc::clone(&self.capture);
        let audio = self.audio;

        tokio::task::spawn_blocking(move || {
            listen_for_phrase(&detector, &recognizer, &*capture, &audio, &cancel)
        })
        .await
        .map_err(|e| Error::Recognizer(format!("wake listener panicked: {e}")))?
    }
}

/// Blocking wake loop: owns the microphone until the phrase is heard or the
/// wait is cancelled
fn listen_for_phrase(
    detector: &WakeWordDetector,
    recognizer: &Mutex<Box<dyn Recognizer>>,
    capture: &dyn CaptureSource,
    audio: &AudioSettings,
    cancel: &CancellationToken,
) -> Result<Option<TriggerEvent>> {
    let mut reader = capture.open(audio)?;
    let mut recognizer = recognizer
        .lock()
        .map_err(|_| Error::Recognizer("recognizer state poisoned".to_string()))?;
    recognizer.reset();

    tracing::info!(phrase = %detector.phrase(), "listening for wake phrase");
    let mut heartbeat = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let frame = reader.read_frame()?;

        if heartbeat.elapsed() >= LISTEN_HEARTBEAT {
            tracing::debug!("still listening for wake phrase");
            heartbeat = Instant::now();
        }

        let decode = recognizer.accept_frame(&frame)?;
        if let Some(matched) = detector.scan(&decode) {
            tracing::info!(matched = %matched, "wake phrase detected");
            return Ok(Some(TriggerEvent::Phrase(matched)));
        }
    }
    // The reader drops on every return path, releasing the microphone before
    // the recording capture opens it.
}
