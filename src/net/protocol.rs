//! Wire protocol for the assistant backend
//!
//! The backend speaks two message kinds on one socket: binary frames of raw
//! little-endian 16-bit PCM, and small JSON control objects. The only
//! control message the client sends is `{"event":"audioEnd"}`; inbound
//! control messages carry an `error` string or an `event` tag.

use serde::Deserialize;

use crate::{Error, Result};

/// One message on the duplex socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Raw little-endian 16-bit PCM
    Binary(Vec<u8>),
    /// UTF-8 JSON control message
    Text(String),
}

/// Structured control messages exchanged beside raw audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// End of the outbound utterance stream
    AudioEnd,
    /// Server-reported error
    ErrorNotice(String),
    /// Server found no speech in the utterance
    NoSpeechDetected,
}

#[derive(Deserialize)]
struct InboundControl {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    event: Option<String>,
}

impl ControlEvent {
    /// Serialize for the wire
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if JSON encoding fails.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::AudioEnd => serde_json::json!({ "event": "audioEnd" }),
            Self::NoSpeechDetected => serde_json::json!({ "event": "noSpeechDetected" }),
            Self::ErrorNotice(message) => serde_json::json!({ "error": message }),
        };
        serde_json::to_string(&value).map_err(Error::from)
    }

    /// Parse an inbound text message. Unrecognized event tags are `Ok(None)`
    /// (ignored, not an error); malformed JSON is [`Error::Protocol`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the payload is not valid JSON.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let msg: InboundControl =
            serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))?;

        if let Some(error) = msg.error {
            return Ok(Some(Self::ErrorNotice(error)));
        }
        match msg.event.as_deref() {
            Some("audioEnd") => Ok(Some(Self::AudioEnd)),
            Some("noSpeechDetected") => Ok(Some(Self::NoSpeechDetected)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_end_serializes_to_the_expected_wire_form() {
        let json = ControlEvent::AudioEnd.to_json().unwrap();
        assert_eq!(json, r#"{"event":"audioEnd"}"#);
    }

    #[test]
    fn test_error_field_parses_to_error_notice() {
        let event = ControlEvent::parse(r#"{"error":"stt backend down"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, ControlEvent::ErrorNotice("stt backend down".to_string()));
    }

    #[test]
    fn test_no_speech_event_parses() {
        let event = ControlEvent::parse(r#"{"event":"noSpeechDetected"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, ControlEvent::NoSpeechDetected);
    }

    #[test]
    fn test_unknown_events_and_fields_are_ignored() {
        assert_eq!(ControlEvent::parse(r#"{"event":"speaking"}"#).unwrap(), None);
        assert_eq!(ControlEvent::parse(r#"{"volume":11}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_json_is_a_protocol_error() {
        let err = ControlEvent::parse("not json at all").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_round_trip_of_client_sent_events() {
        for event in [ControlEvent::AudioEnd, ControlEvent::NoSpeechDetected] {
            let json = event.to_json().unwrap();
            assert_eq!(ControlEvent::parse(&json).unwrap(), Some(event));
        }
    }
}
