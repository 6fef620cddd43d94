//! `StubEngine` — placeholder backend that produces silence-adjacent audio
//! without a model.
//!
//! Used for development without voice files installed and by the pool and
//! queue tests. Output length is deterministic in the input text so tests
//! can reason about playback duration.

use tracing::debug;

use crate::error::{Result, VocalisError};

use super::{SpeechEngine, Synthesis};

/// Samples emitted per input character at 1.0 speed.
const SAMPLES_PER_CHAR: usize = 80;

/// Deterministic tone-ramp stub engine for one voice.
pub struct StubEngine {
    sample_rate: u32,
    synth_count: u64,
}

impl StubEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            synth_count: 0,
        }
    }
}

impl SpeechEngine for StubEngine {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubEngine::warm_up — no-op");
        Ok(())
    }

    fn synthesize(&mut self, text: &str, speed: f32) -> Result<Synthesis> {
        if !(0.1..=10.0).contains(&speed) {
            return Err(VocalisError::Synthesis(format!(
                "speed {speed} out of range"
            )));
        }

        self.synth_count += 1;
        let len = ((text.chars().count() * SAMPLES_PER_CHAR) as f32 / speed) as usize;
        let samples = (0..len)
            .map(|i| ((i % 100) as f32 / 100.0 - 0.5) * 0.05)
            .collect();

        Ok(Synthesis {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_scales_with_text_and_speed() {
        let mut engine = StubEngine::new(22_050);
        let slow = engine.synthesize("hello", 1.0).unwrap();
        let fast = engine.synthesize("hello", 2.0).unwrap();

        assert_eq!(slow.samples.len(), 5 * SAMPLES_PER_CHAR);
        assert_eq!(fast.samples.len(), 5 * SAMPLES_PER_CHAR / 2);
        assert_eq!(slow.sample_rate, 22_050);
    }

    #[test]
    fn absurd_speed_is_rejected() {
        let mut engine = StubEngine::new(22_050);
        assert!(engine.synthesize("hi", 0.0).is_err());
    }
}
