//! Configuration for the voice client
//!
//! Every setting is environment-sourced; a local `.env` file is honored by
//! the binary before parsing. Unset variables fall back to defaults, and
//! unparsable values are logged and ignored rather than aborting startup.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::audio::AudioSettings;

/// Endpoint used when `LYRA_ENDPOINT` is unset. Connecting to it will fail
/// visibly until the operator configures a real backend.
pub const PLACEHOLDER_ENDPOINT: &str = "ws://YOUR_BACKEND_HOST:3000";

/// Voice client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend WebSocket URL
    pub endpoint: String,

    /// Wake phrase matched against recognizer decodes
    pub wake_word: String,

    /// When false the client always uses the manual trigger
    pub wake_word_enabled: bool,

    /// Path to the Vosk model directory
    pub vosk_model_path: PathBuf,

    /// RMS level below which a frame counts as silent
    pub silence_threshold: f64,

    /// Silence required after the last voiced frame to end an utterance
    pub silence_duration: Duration,

    /// Hard cap on a single recording
    pub max_recording: Duration,

    /// Deadline for one connect attempt
    pub connect_timeout: Duration,

    /// Fixed delay between reconnect attempts
    pub reconnect_backoff: Duration,

    /// Capture and playback format
    pub audio: AudioSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: PLACEHOLDER_ENDPOINT.to_string(),
            wake_word: "hey assistant".to_string(),
            wake_word_enabled: true,
            vosk_model_path: PathBuf::from("vosk-model-small-en-us-0.15"),
            silence_threshold: 500.0,
            silence_duration: Duration::from_secs_f64(2.0),
            max_recording: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(5),
            audio: AudioSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::build(|key| std::env::var(key).ok())
    }

    /// True when `LYRA_ENDPOINT` was never configured
    #[must_use]
    pub fn endpoint_is_placeholder(&self) -> bool {
        self.endpoint.contains("YOUR_BACKEND_HOST")
    }

    fn build(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let endpoint = get("LYRA_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.endpoint);
        if let Err(e) = Url::parse(&endpoint) {
            tracing::warn!(endpoint = %endpoint, error = %e, "endpoint is not a valid URL");
        }

        Self {
            endpoint,
            wake_word: get("LYRA_WAKE_WORD").unwrap_or(defaults.wake_word),
            wake_word_enabled: parse_env(
                get("LYRA_WAKE_WORD_ENABLED"),
                "LYRA_WAKE_WORD_ENABLED",
                defaults.wake_word_enabled,
                parse_bool,
            ),
            vosk_model_path: get("LYRA_VOSK_MODEL")
                .map_or(defaults.vosk_model_path, PathBuf::from),
            silence_threshold: parse_env(
                get("LYRA_SILENCE_THRESHOLD"),
                "LYRA_SILENCE_THRESHOLD",
                defaults.silence_threshold,
                |raw| raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0),
            ),
            silence_duration: parse_env(
                get("LYRA_SILENCE_DURATION_SECS"),
                "LYRA_SILENCE_DURATION_SECS",
                defaults.silence_duration,
                parse_secs,
            ),
            max_recording: parse_env(
                get("LYRA_MAX_RECORDING_SECS"),
                "LYRA_MAX_RECORDING_SECS",
                defaults.max_recording,
                parse_secs,
            ),
            connect_timeout: defaults.connect_timeout,
            reconnect_backoff: defaults.reconnect_backoff,
            audio: AudioSettings {
                sample_rate: parse_env(
                    get("LYRA_SAMPLE_RATE"),
                    "LYRA_SAMPLE_RATE",
                    defaults.audio.sample_rate,
                    |raw| raw.parse().ok().filter(|v| *v > 0),
                ),
                frame_size: parse_env(
                    get("LYRA_FRAME_SIZE"),
                    "LYRA_FRAME_SIZE",
                    defaults.audio.frame_size,
                    |raw| raw.parse().ok().filter(|v| *v > 0),
                ),
            },
        }
    }
}

fn parse_env<T>(
    raw: Option<String>,
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> T {
    match raw {
        None => default,
        Some(raw) => parse(&raw).unwrap_or_else(|| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_secs(raw: &str) -> Option<Duration> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
}
