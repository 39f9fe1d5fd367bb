//! Lyra - wake-word voice client for streaming assistant backends
//!
//! Captures microphone audio, detects a wake phrase locally, streams the
//! utterance over a persistent duplex WebSocket to a processing backend, and
//! plays back the audio response.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Session Controller                   │
//! │      Idle → Listening → Recording → Draining         │
//! └───────┬──────────────────┬───────────────┬──────────┘
//!         │                  │               │
//! ┌───────▼───────┐  ┌───────▼───────┐  ┌────▼─────────┐
//! │ Wake Trigger  │  │   Audio I/O   │  │  Connection  │
//! │ vosk / manual │  │ capture  play │  │ ws reconnect │
//! └───────────────┘  └───────────────┘  └────┬─────────┘
//!                                            │
//!                                   ┌────────▼─────────┐
//!                                   │ Assistant backend│
//!                                   │  (PCM + JSON ws) │
//!                                   └──────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod net;
pub mod session;
pub mod wake;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{SessionController, SessionState};
