//! # vocalis-core
//!
//! Reusable local text-to-speech pipeline SDK.
//!
//! ## Architecture
//!
//! ```text
//! HTTP / hotkey ─► SourceRouter ─► SpeechQueue ─► worker thread
//!                      │                              │
//!                VoiceCatalog ◄── SynthesizerPool ◄───┤ synthesize
//!                (notify watcher,      │              │
//!                 arc-swap index)  SpeechEngine       ▼
//!                                 (Piper ONNX)    AudioSink (cpal)
//! ```
//!
//! Playback is strictly serial: one worker thread owns the queue, pops the
//! most urgent request, synthesizes, and plays. A more urgent arrival can
//! cancel the in-flight playback through the request's cancel flag.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod capture;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod events;
pub mod queue;
pub mod router;
pub mod synth;

// Convenience re-exports for downstream crates
pub use audio::{AudioSink, CpalSink, PlaybackOutcome};
pub use capture::{capture_selection, CaptureHost};
pub use catalog::{Voice, VoiceCatalog};
pub use engine::{SpeechEngine, Synthesis, SynthesizerFactory};
pub use error::VocalisError;
pub use events::{QueueEvent, QueueEventKind};
pub use queue::{CancelFlag, QueueConfig, SpeechQueue, SpeechRequest};
pub use router::{Admission, SourceConfig, SourceRouter};
pub use synth::SynthesizerPool;

#[cfg(feature = "onnx")]
pub use engine::{PiperEngine, PiperFactory};
