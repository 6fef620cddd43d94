//! Audio playback via cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by popping directly from an SPSC ring
//! buffer consumer whose `try_pop` is lock-free and allocation-free. The
//! queue worker thread feeds the producer side and polls the cancel flag
//! between pushes, which bounds cancellation latency by one feed interval.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). The stream is therefore created, driven and dropped entirely
//! inside [`AudioSink::play`], which the queue worker calls from one thread.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, StreamConfig,
};

use crate::error::Result;
use crate::queue::CancelFlag;

/// How one playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The full utterance reached the device.
    Completed,
    /// The cancel flag was raised mid-playback.
    Cancelled,
}

/// Contract between the queue worker and the audio output.
///
/// `play` blocks until the utterance finished or the cancel flag aborted it.
/// Implementations must observe `cancel` with sub-100 ms latency.
pub trait AudioSink: Send + Sync + 'static {
    fn play(&self, samples: &[f32], sample_rate: u32, cancel: &CancelFlag)
        -> Result<PlaybackOutcome>;
}

/// Input frame count per resampler call while preparing playback.
const RESAMPLE_CHUNK: usize = 960;

/// Sink over the default (or a named) cpal output device.
pub struct CpalSink {
    preferred_device: Option<String>,
}

impl CpalSink {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

/// f32 sample in [-1, 1] → signed 16-bit PCM.
#[allow(dead_code)]
fn sample_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// f32 sample in [-1, 1] → unsigned 16-bit PCM (midpoint = silence).
#[allow(dead_code)]
fn sample_to_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) * 0.5 + 0.5) * u16::MAX as f32) as u16
}

#[cfg(feature = "audio-cpal")]
impl AudioSink for CpalSink {
    fn play(
        &self,
        samples: &[f32],
        sample_rate: u32,
        cancel: &CancelFlag,
    ) -> Result<PlaybackOutcome> {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        use ringbuf::{
            traits::{Consumer, Producer, Split},
            HeapRb,
        };
        use tracing::{debug, error, info};

        use crate::audio::resample::RateConverter;
        use crate::error::VocalisError;

        /// Worker-side poll cadence for feeding and cancellation.
        const FEED_INTERVAL: Duration = Duration::from_millis(10);

        if samples.is_empty() {
            return Ok(PlaybackOutcome::Completed);
        }
        if cancel.is_raised() {
            return Ok(PlaybackOutcome::Cancelled);
        }

        let (output_device, device_name) =
            device::find_output_device(self.preferred_device.as_deref())?;
        let supported = output_device
            .default_output_config()
            .map_err(|e| VocalisError::AudioDevice(e.to_string()))?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();

        // Convert the whole utterance to the device rate up front; playback
        // then only moves samples from `pcm` into the ring.
        let mut converter = RateConverter::new(sample_rate, device_rate, RESAMPLE_CHUNK)?;
        let mut pcm = converter.process(samples);
        pcm.extend(converter.finish());
        let total = pcm.len();

        info!(
            device = device_name.as_str(),
            device_rate,
            channels,
            frames = total,
            "opening output stream"
        );

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // ~125 ms of ring keeps the callback fed without adding perceptible
        // cancellation latency (the un-pushed remainder is simply dropped).
        let ring_capacity = (device_rate as usize / 8).max(4096);
        let (mut producer, mut consumer) = HeapRb::<f32>::new(ring_capacity).split();
        let played = Arc::new(AtomicUsize::new(0));

        // Pre-clone one Arc per sample format branch so each closure owns its counter.
        let played_f32 = Arc::clone(&played);
        let played_i16 = Arc::clone(&played);
        let played_u16 = Arc::clone(&played);
        let ch = channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => output_device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    for frame in data.chunks_mut(ch) {
                        let sample = match consumer.try_pop() {
                            Some(s) => {
                                played_f32.fetch_add(1, Ordering::Relaxed);
                                s
                            }
                            None => 0.0,
                        };
                        for slot in frame {
                            *slot = sample;
                        }
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::I16 => output_device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    for frame in data.chunks_mut(ch) {
                        let sample = match consumer.try_pop() {
                            Some(s) => {
                                played_i16.fetch_add(1, Ordering::Relaxed);
                                sample_to_i16(s)
                            }
                            None => 0,
                        };
                        for slot in frame {
                            *slot = sample;
                        }
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::U16 => output_device.build_output_stream(
                &config,
                move |data: &mut [u16], _info| {
                    for frame in data.chunks_mut(ch) {
                        let sample = match consumer.try_pop() {
                            Some(s) => {
                                played_u16.fetch_add(1, Ordering::Relaxed);
                                sample_to_u16(s)
                            }
                            None => sample_to_u16(0.0),
                        };
                        for slot in frame {
                            *slot = sample;
                        }
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            fmt => {
                return Err(VocalisError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VocalisError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VocalisError::AudioStream(e.to_string()))?;

        // Feed + drain, polling the cancel flag each cycle. The deadline
        // guards against a device that stops consuming — a stalled drain
        // must not wedge the queue worker forever.
        let audio_len = Duration::from_secs_f64(total as f64 / device_rate as f64);
        let deadline = Instant::now() + audio_len + Duration::from_secs(2);
        let mut offset = 0usize;

        loop {
            if cancel.is_raised() {
                debug!(pushed = offset, total, "playback cancelled");
                return Ok(PlaybackOutcome::Cancelled);
            }
            if offset < total {
                offset += producer.push_slice(&pcm[offset..]);
            } else if played.load(Ordering::Relaxed) >= total {
                break;
            }
            if Instant::now() >= deadline {
                return Err(VocalisError::AudioStream(
                    "playback stalled — device stopped consuming".into(),
                ));
            }
            std::thread::sleep(FEED_INTERVAL);
        }

        // Let the device's own buffer flush before tearing the stream down.
        std::thread::sleep(Duration::from_millis(50));
        Ok(PlaybackOutcome::Completed)
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioSink for CpalSink {
    fn play(
        &self,
        _samples: &[f32],
        _sample_rate: u32,
        _cancel: &CancelFlag,
    ) -> Result<PlaybackOutcome> {
        Err(crate::error::VocalisError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
