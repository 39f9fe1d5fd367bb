//! Audio capture from the microphone
//!
//! cpal delivers samples through a push callback; consumers pull fixed-size
//! frames through the blocking [`FrameReader`] interface. The queue between
//! the two grows rather than dropping samples when the consumer falls behind,
//! so frames are never lost or reordered during a recording.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};

use super::{AudioFrame, AudioSettings};
use crate::{Error, Result};

/// Interval between wakeups while a blocked read waits for samples
const READ_POLL: Duration = Duration::from_millis(100);

/// Blocking pull interface for captured frames. At most one reader exists at
/// any instant; dropping it releases the device.
pub trait FrameReader {
    /// Block until one full frame has been captured
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the capture stream has failed.
    fn read_frame(&mut self) -> Result<AudioFrame>;
}

/// Factory for capture streams, injectable so the session logic is testable
/// without audio hardware
pub trait CaptureSource: Send + Sync {
    /// Open the default input device for the given format
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no device supports the format.
    fn open(&self, settings: &AudioSettings) -> Result<Box<dyn FrameReader>>;
}

/// The production capture source backed by cpal
pub struct CpalCapture;

impl CaptureSource for CpalCapture {
    fn open(&self, settings: &AudioSettings) -> Result<Box<dyn FrameReader>> {
        Ok(Box::new(CaptureStream::open(settings)?))
    }
}

struct FrameQueue {
    samples: Mutex<VecDeque<i16>>,
    available: Condvar,
    failed: AtomicBool,
}

/// An open microphone stream delivering fixed-size PCM frames
pub struct CaptureStream {
    // Keeps the device open; not Send, so the stream lives and dies on the
    // thread that opened it.
    _stream: Stream,
    queue: Arc<FrameQueue>,
    frame_size: usize,
}

impl CaptureStream {
    /// Open the default input device
    ///
    /// The device must support mono i16 at the configured sample rate; the
    /// format is validated here rather than assumed later, so RMS levels are
    /// always computed on the declared sample width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no input device is available or none
    /// supports the format.
    pub fn open(settings: &AudioSettings) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == SampleFormat::I16
                    && c.min_sample_rate() <= SampleRate(settings.sample_rate)
                    && c.max_sample_rate() >= SampleRate(settings.sample_rate)
            })
            .ok_or_else(|| {
                Error::Device(format!(
                    "no mono i16 input config at {} Hz",
                    settings.sample_rate
                ))
            })?;

        let config: StreamConfig = supported
            .with_sample_rate(SampleRate(settings.sample_rate))
            .config();

        let queue = Arc::new(FrameQueue {
            samples: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            failed: AtomicBool::new(false),
        });

        let data_queue = Arc::clone(&queue);
        let error_queue = Arc::clone(&queue);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut samples) = data_queue.samples.lock() {
                        samples.extend(data.iter().copied());
                    }
                    data_queue.available.notify_one();
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    error_queue.failed.store(true, Ordering::Relaxed);
                    error_queue.available.notify_all();
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = settings.sample_rate,
            frame_size = settings.frame_size,
            "capture stream opened"
        );

        Ok(Self {
            _stream: stream,
            queue,
            frame_size: settings.frame_size,
        })
    }

    /// Release the device. Dropping the stream has the same effect; taking
    /// ownership here makes a second close unrepresentable.
    pub fn close(self) {
        tracing::debug!("capture stream closed");
    }

    fn next_frame(&self) -> Result<AudioFrame> {
        let mut samples = self
            .queue
            .samples
            .lock()
            .map_err(|_| Error::Device("capture queue poisoned".to_string()))?;

        loop {
            if samples.len() >= self.frame_size {
                let frame: Vec<i16> = samples.drain(..self.frame_size).collect();
                return Ok(AudioFrame::new(frame));
            }
            if self.queue.failed.load(Ordering::Relaxed) {
                return Err(Error::Device("capture stream failed".to_string()));
            }
            let (guard, _) = self
                .queue
                .available
                .wait_timeout(samples, READ_POLL)
                .map_err(|_| Error::Device("capture queue poisoned".to_string()))?;
            samples = guard;
        }
    }
}

impl FrameReader for CaptureStream {
    fn read_frame(&mut self) -> Result<AudioFrame> {
        self.next_frame()
    }
}
