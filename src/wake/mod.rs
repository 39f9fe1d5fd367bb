//! Wake triggering
//!
//! Two interchangeable trigger sources behind one capability interface,
//! selected once at startup: a wake-word listener over the local recognizer
//! (feature `vosk`), and a manual stdin fallback. The fallback is permanent
//! for the process lifetime; the sources are never active together.

mod detector;
mod manual;
#[cfg(feature = "vosk")]
mod vosk;

pub use detector::{Decode, Recognizer, WakeWordDetector, WakeWordTrigger};
pub use manual::ManualTrigger;
#[cfg(feature = "vosk")]
pub use self::vosk::VoskEngine;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::audio::CaptureSource;
use crate::config::Config;

/// What fired the trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    /// The wake phrase was heard; carries the decode that matched
    Phrase(String),
    /// Operator keypress
    Manual,
}

/// A blocking-until-triggered wake source
#[async_trait]
pub trait TriggerSource: Send + Sync {
    /// Resolve when the trigger fires. `Ok(None)` means the wait was
    /// cancelled. Any microphone held for the wait is released before this
    /// returns.
    async fn wait_for_trigger(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<TriggerEvent>>;
}

/// Select the trigger source for this process lifetime
///
/// Falls back to the manual trigger when the wake word is disabled or the
/// recognizer cannot be initialized.
pub fn build_trigger_source(
    config: &Config,
    capture: Arc<dyn CaptureSource>,
) -> Box<dyn TriggerSource> {
    if !config.wake_word_enabled {
        tracing::info!("wake word disabled by configuration; press Enter to record");
        return Box::new(ManualTrigger);
    }

    match wake_word_source(config, capture) {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "wake word engine unavailable, falling back to manual trigger; press Enter to record"
            );
            Box::new(ManualTrigger)
        }
    }
}

#[cfg(feature = "vosk")]
fn wake_word_source(
    config: &Config,
    capture: Arc<dyn CaptureSource>,
) -> Result<Box<dyn TriggerSource>> {
    let engine = VoskEngine::load(&config.vosk_model_path, config.audio.sample_rate)?;
    tracing::info!(
        wake_word = %config.wake_word,
        model = %config.vosk_model_path.display(),
        "wake word engine initialized"
    );
    Ok(Box::new(WakeWordTrigger::new(
        WakeWordDetector::new(&config.wake_word),
        Box::new(engine),
        capture,
        config.audio,
    )))
}

#[cfg(not(feature = "vosk"))]
fn wake_word_source(
    _config: &Config,
    _capture: Arc<dyn CaptureSource>,
) -> Result<Box<dyn TriggerSource>> {
    Err(crate::Error::Recognizer(
        "built without the vosk feature".to_string(),
    ))
}
