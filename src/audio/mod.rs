//! Audio capture and playback
//!
//! All audio in the client is mono 16-bit signed PCM. Capture hands out
//! fixed-size frames through a blocking pull interface; playback renders one
//! fully-buffered clip at a time.

mod capture;
mod playback;
mod silence;

pub use capture::{CaptureSource, CaptureStream, CpalCapture, FrameReader};
pub use playback::Playback;
pub use silence::{Classification, SilenceTracker};

/// Capture/playback format shared by every audio consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSettings {
    /// Samples per second
    pub sample_rate: u32,
    /// Samples per captured frame
    pub frame_size: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_size: 1024,
        }
    }
}

/// One fixed-length chunk of mono PCM samples, the unit of capture and
/// transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wire encoding: little-endian 16-bit PCM
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        pcm_to_le_bytes(&self.samples)
    }
}

/// Encode samples as little-endian bytes for the wire
#[must_use]
pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Decode little-endian bytes into samples. A trailing odd byte is dropped.
#[must_use]
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_byte_order_is_little_endian() {
        let bytes = pcm_to_le_bytes(&[1, -2, 0x0102]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x02, 0x01]);
        assert_eq!(pcm_from_le_bytes(&bytes), vec![1, -2, 0x0102]);
    }

    #[test]
    fn test_trailing_odd_byte_is_dropped() {
        assert_eq!(pcm_from_le_bytes(&[0x01, 0x00, 0xFF]), vec![1]);
    }
}
