//! Vosk-backed recognizer
//!
//! Wraps the offline Vosk engine behind the [`Recognizer`] capability. The
//! model directory is probed once at startup; a missing or unloadable model
//! puts the client in manual-trigger mode for its whole lifetime.

use std::path::Path;

use vosk::{DecodingState, Model};

use super::detector::{Decode, Recognizer};
use crate::audio::AudioFrame;
use crate::{Error, Result};

/// Offline recognizer over a local Vosk model
pub struct VoskEngine {
    recognizer: vosk::Recognizer,
}

impl VoskEngine {
    /// Load the model directory and build a recognizer for the capture rate
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recognizer`] when the model directory is missing or
    /// the engine rejects it.
    pub fn load(model_path: &Path, sample_rate: u32) -> Result<Self> {
        if !model_path.exists() {
            return Err(Error::Recognizer(format!(
                "model not found at {}; download one from https://alphacephei.com/vosk/models",
                model_path.display()
            )));
        }

        let model = Model::new(model_path.to_string_lossy()).ok_or_else(|| {
            Error::Recognizer(format!("failed to load model at {}", model_path.display()))
        })?;

        #[allow(clippy::cast_precision_loss)]
        let mut recognizer = vosk::Recognizer::new(&model, sample_rate as f32)
            .ok_or_else(|| Error::Recognizer("failed to create recognizer".to_string()))?;

        // Partial hypotheses give the fastest wake response
        recognizer.set_partial_words(true);
        recognizer.set_max_alternatives(0);

        Ok(Self { recognizer })
    }
}

impl Recognizer for VoskEngine {
    fn accept_frame(&mut self, frame: &AudioFrame) -> Result<Decode> {
        match self.recognizer.accept_waveform(frame.samples()) {
            Ok(DecodingState::Finalized) => {
                let text = self
                    .recognizer
                    .result()
                    .single()
                    .map(|r| r.text.to_string())
                    .unwrap_or_default();
                Ok(Decode::Final(text))
            }
            Ok(DecodingState::Running) => {
                Ok(Decode::Partial(self.recognizer.partial_result().partial.to_string()))
            }
            Ok(DecodingState::Failed) => {
                Err(Error::Recognizer("decoder failed on frame".to_string()))
            }
            Err(e) => Err(Error::Recognizer(format!("accept_waveform failed: {e:?}"))),
        }
    }

    fn reset(&mut self) {
        self.recognizer.reset();
    }
}
