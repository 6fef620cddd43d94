//! Synthesis backend abstraction.
//!
//! The `SpeechEngine` trait decouples the pool and the queue worker from any
//! specific backend (Piper ONNX, stub). One engine instance serves one voice.
//!
//! `&mut self` on `synthesize` intentionally expresses that engines are
//! stateful and not safe for concurrent use on one handle. All mutation is
//! therefore serialised through `EngineHandle`'s `parking_lot::Mutex`;
//! different voices hold different handles and may synthesize concurrently.

pub mod stub;

#[cfg(feature = "onnx")]
pub mod piper;

#[cfg(feature = "onnx")]
pub use piper::{PiperEngine, PiperFactory};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::Voice;
use crate::error::Result;

/// Output of one synthesis call: mono f32 PCM plus its sample rate.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Contract for text-to-speech backends.
pub trait SpeechEngine: Send + 'static {
    /// One-time warm-up: load weights, run a dummy inference. Called once
    /// when the handle is created.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Synthesize `text` into mono f32 samples.
    ///
    /// `speed` is a rate multiplier (1.0 = the voice's natural pace).
    ///
    /// # Errors
    /// Returns `VocalisError::Synthesis` for engine-level failures.
    fn synthesize(&mut self, text: &str, speed: f32) -> Result<Synthesis>;
}

/// Creates engines for voices. The pool stays backend-agnostic; production
/// wires a Piper factory, tests wire scripted stubs.
pub trait SynthesizerFactory: Send + Sync + 'static {
    fn create(&self, voice: &Voice) -> Result<Box<dyn SpeechEngine>>;
}

/// Thread-safe reference-counted handle to one voice's engine.
///
/// Uses `parking_lot::Mutex` for non-poisoning on panic and a faster
/// uncontended lock than `std::sync::Mutex`.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<Box<dyn SpeechEngine>>>);

impl EngineHandle {
    pub fn new(engine: Box<dyn SpeechEngine>) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}
