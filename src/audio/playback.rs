//! Audio playback to speakers
//!
//! Response clips arrive fully buffered, so playback builds a short-lived
//! output stream per clip and blocks until the device has rendered it. No
//! output stream outlives a clip, which keeps the device free for capture
//! between responses.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};

use super::AudioSettings;
use crate::{Error, Result};

/// Plays PCM clips on the default output device
pub struct Playback {
    config: StreamConfig,
    sample_rate: u32,
}

impl Playback {
    /// Probe the default output device for a usable config
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no output device supports i16 at the
    /// configured sample rate.
    pub fn open(settings: &AudioSettings) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let rate = SampleRate(settings.sample_rate);
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == SampleFormat::I16
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
            .or_else(|| {
                // Fallback: stereo, mono samples duplicated per channel
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.sample_format() == SampleFormat::I16
                        && c.min_sample_rate() <= rate
                        && c.max_sample_rate() >= rate
                })
            })
            .ok_or_else(|| {
                Error::Device(format!(
                    "no i16 output config at {} Hz",
                    settings.sample_rate
                ))
            })?;

        let config = supported.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = settings.sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            sample_rate: settings.sample_rate,
        })
    }

    /// Play one clip, blocking until the device has rendered it
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the output stream cannot be built or
    /// started.
    pub fn play(&self, clip: &[i16]) -> Result<()> {
        if clip.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device".to_string()))?;

        let config = self.config.clone();
        let channels = usize::from(config.channels);

        let samples = Arc::new(clip.to_vec());
        let position = Arc::new(Mutex::new(0usize));
        let finished = Arc::new(Mutex::new(false));

        let cb_samples = Arc::clone(&samples);
        let cb_position = Arc::clone(&position);
        let cb_finished = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut pos) = cb_position.lock() else {
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < cb_samples.len() {
                            cb_samples[*pos]
                        } else {
                            if let Ok(mut done) = cb_finished.lock() {
                                *done = true;
                            }
                            0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                        if *pos < cb_samples.len() {
                            *pos += 1;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        // Poll for completion, bounded by the clip duration plus slack
        let duration_ms = (samples.len() as u64 * 1000) / u64::from(self.sample_rate);
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

        loop {
            if finished.lock().map(|done| *done).unwrap_or(true) {
                break;
            }
            if Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        // Let the device buffer flush before tearing the stream down
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);

        tracing::debug!(samples = samples.len(), "playback complete");
        Ok(())
    }
}
