//! Silence classification for end-of-utterance detection
//!
//! Pure functions over frames and timestamps; the session controller owns
//! the `last voice activity` instant this module reasons about.

use std::time::{Duration, Instant};

use super::AudioFrame;

/// Result of classifying one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// True when the frame's energy is below the threshold
    pub silent: bool,
    /// Root-mean-square amplitude of the frame
    pub rms: f64,
}

/// Classifies frames against a fixed RMS threshold
#[derive(Debug, Clone)]
pub struct SilenceTracker {
    threshold: f64,
    timeout: Duration,
}

impl SilenceTracker {
    #[must_use]
    pub const fn new(threshold: f64, timeout: Duration) -> Self {
        Self { threshold, timeout }
    }

    /// Classify one frame. A frame with RMS exactly at the threshold counts
    /// as voiced.
    #[must_use]
    pub fn classify(&self, frame: &AudioFrame) -> Classification {
        let rms = rms(frame.samples());
        Classification {
            silent: rms < self.threshold,
            rms,
        }
    }

    /// True once the configured silence duration has elapsed since the last
    /// voiced frame. Monotonic in `now`: the result flips exactly at the
    /// duration boundary.
    #[must_use]
    pub fn is_speech_timed_out(&self, last_voice_activity: Instant, now: Instant) -> bool {
        now.duration_since(last_voice_activity) >= self.timeout
    }
}

#[allow(clippy::cast_precision_loss)]
fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| f64::from(s) * f64::from(s))
        .sum();
    (sum_squares / samples.len() as f64).sqrt()
}
