//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Voices synthesize at their model rate (commonly 22.05 kHz for Piper);
//! the output device usually runs at 44.1 or 48 kHz. `RateConverter`
//! bridges that gap on the queue worker thread, where allocation is
//! allowed.
//!
//! When the voice rate matches the device rate, `RateConverter` is a
//! zero-copy passthrough — no rubato session is created at all.
//!
//! ## Usage
//!
//! ```ignore
//! let mut rc = RateConverter::new(22_050, 48_000, 960)?;
//! let mut out = rc.process(&samples); // Vec<f32> at 48 kHz
//! out.extend(rc.finish());            // flush the buffered tail
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, VocalisError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `source_rate`: Sample rate of the synthesized audio (Hz).
    /// - `target_rate`: Sample rate the output device runs at (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `960`).
    ///
    /// # Errors
    /// Returns `VocalisError::AudioStream` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| VocalisError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call or for
    /// [`finish`](RateConverter::finish).
    ///
    /// In passthrough mode (same rates), input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            // Zero-copy passthrough
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Flush the buffered tail by zero-padding it to a full chunk.
    ///
    /// An utterance ends mid-chunk almost every time; without this the last
    /// few milliseconds of speech would be dropped.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            return Vec::new();
        }
        let pad = self.chunk_size - (self.input_buf.len() % self.chunk_size);
        if pad != self.chunk_size {
            let padded: Vec<f32> = vec![0.0; pad];
            return self.process(&padded);
        }
        Vec::new()
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(22_050, 22_050, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
        assert!(rc.finish().is_empty());
    }

    #[test]
    fn ratio_22k_to_44k_correct_length_and_level() {
        let mut rc = RateConverter::new(22_050, 44_100, 960).unwrap();
        assert!(!rc.is_passthrough());
        // 960 input samples at 22.05 kHz → ~1920 at 44.1 kHz
        let samples = vec![0.25f32; 960];
        let out = rc.process(&samples);
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = 1920usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 20,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
        // A constant signal must come out at the same level away from the
        // filter warm-up edge.
        approx::assert_relative_eq!(out[out.len() / 2], 0.25, max_relative = 0.05);
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(22_050, 48_000, 960).unwrap();
        // Fewer than chunk_size samples → nothing output yet
        let samples = vec![0.0f32; 500];
        let out = rc.process(&samples);
        assert!(
            out.is_empty(),
            "expected empty output for partial chunk, got {}",
            out.len()
        );
    }

    #[test]
    fn finish_flushes_the_buffered_tail() {
        let mut rc = RateConverter::new(22_050, 48_000, 960).unwrap();
        let out = rc.process(&vec![0.1f32; 500]);
        assert!(out.is_empty());
        let tail = rc.finish();
        assert!(
            !tail.is_empty(),
            "finish must emit the zero-padded remainder"
        );
    }
}
