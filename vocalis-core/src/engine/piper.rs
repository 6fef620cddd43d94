//! Piper ONNX backend.
//!
//! Piper voices are VITS-style models exported with a sibling
//! `<id>.onnx.json` config carrying the sample rate, inference scales and
//! the symbol → id table. Inference takes four tensors:
//!
//! ```text
//! input          i64 [1, n]   phoneme/grapheme ids, pad-interleaved
//! input_lengths  i64 [1]      n
//! scales         f32 [3]      [noise_scale, length_scale, noise_w]
//! sid            i64 [1]      speaker id (multi-speaker models only)
//! ```
//!
//! and produces one f32 tensor of mono PCM at the config's sample rate.

use std::collections::HashMap;
use std::path::Path;

use ndarray::{Array1, Array2};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;
use serde::Deserialize;
use tracing::{debug, info};

use crate::catalog::{Voice, DEFAULT_SAMPLE_RATE};
use crate::error::{Result, VocalisError};

use super::{SpeechEngine, Synthesis, SynthesizerFactory};

/// Symbols Piper uses to frame and pace an id sequence.
const PAD: &str = "_";
const BOS: &str = "^";
const EOS: &str = "$";

#[derive(Debug, Deserialize)]
struct PiperConfig {
    #[serde(default)]
    audio: AudioSection,
    #[serde(default)]
    inference: InferenceSection,
    #[serde(default)]
    phoneme_id_map: HashMap<String, Vec<i64>>,
    #[serde(default = "one")]
    num_speakers: u32,
}

#[derive(Debug, Deserialize)]
struct AudioSection {
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InferenceSection {
    #[serde(default = "default_noise_scale")]
    noise_scale: f32,
    #[serde(default = "default_length_scale")]
    length_scale: f32,
    #[serde(default = "default_noise_w")]
    noise_w: f32,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            noise_scale: default_noise_scale(),
            length_scale: default_length_scale(),
            noise_w: default_noise_w(),
        }
    }
}

fn one() -> u32 {
    1
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_noise_scale() -> f32 {
    0.667
}

fn default_length_scale() -> f32 {
    1.0
}

fn default_noise_w() -> f32 {
    0.8
}

/// One loaded Piper voice.
pub struct PiperEngine {
    voice_id: String,
    session: Session,
    config: PiperConfig,
}

impl PiperEngine {
    /// Load the ONNX session and parse the voice config.
    ///
    /// Expensive (hundreds of ms to seconds for the model load) — the pool
    /// creates each engine lazily and keeps it for process lifetime.
    pub fn load(voice: &Voice) -> Result<Self> {
        if !voice.model_path.is_file() {
            return Err(VocalisError::ModelNotFound {
                path: voice.model_path.clone(),
            });
        }

        let raw = std::fs::read_to_string(&voice.config_path)?;
        let config: PiperConfig = serde_json::from_str(&raw)
            .map_err(|e| VocalisError::VoiceConfig(format!("{}: {e}", voice.id)))?;

        info!(
            voice = %voice.id,
            sample_rate = config.audio.sample_rate,
            num_speakers = config.num_speakers,
            symbols = config.phoneme_id_map.len(),
            "loading piper voice"
        );
        let session = create_session(&voice.model_path)?;

        Ok(Self {
            voice_id: voice.id.clone(),
            session,
            config,
        })
    }

    /// Map text to the model's id sequence: BOS, then each known symbol
    /// followed by a pad, then EOS. Unknown symbols are dropped.
    fn symbol_ids(&self, text: &str) -> Vec<i64> {
        let map = &self.config.phoneme_id_map;
        let pad = first_id(map, PAD);
        let mut ids = Vec::with_capacity(text.len() * 2 + 2);

        if let Some(bos) = first_id(map, BOS) {
            ids.push(bos);
        }
        for ch in text.chars() {
            let key = ch.to_string();
            let id = first_id(map, &key).or_else(|| first_id(map, &key.to_lowercase()));
            if let Some(id) = id {
                ids.push(id);
                if let Some(pad) = pad {
                    ids.push(pad);
                }
            }
        }
        if let Some(eos) = first_id(map, EOS) {
            ids.push(eos);
        }
        ids
    }

    fn run_inference(&mut self, ids: Vec<i64>, speed: f32) -> Result<Vec<f32>> {
        let n = ids.len();
        let input = Array2::from_shape_vec((1, n), ids)
            .map_err(|e| VocalisError::Synthesis(format!("input reshape: {e}")))?;
        let input_lengths = Array1::from_vec(vec![n as i64]);
        // Piper paces by length_scale; a 2× speed request halves it.
        let length_scale = self.config.inference.length_scale / speed.clamp(0.1, 10.0);
        let scales = Array1::from_vec(vec![
            self.config.inference.noise_scale,
            length_scale,
            self.config.inference.noise_w,
        ]);

        let input_val = Value::from_array(input)
            .map_err(|e: ort::Error| VocalisError::EngineSession(e.to_string()))?;
        let lengths_val = Value::from_array(input_lengths)
            .map_err(|e: ort::Error| VocalisError::EngineSession(e.to_string()))?;
        let scales_val = Value::from_array(scales)
            .map_err(|e: ort::Error| VocalisError::EngineSession(e.to_string()))?;

        let outputs = if self.config.num_speakers > 1 {
            let sid = Value::from_array(Array1::from_vec(vec![0_i64]))
                .map_err(|e: ort::Error| VocalisError::EngineSession(e.to_string()))?;
            self.session.run(ort::inputs![
                "input" => input_val,
                "input_lengths" => lengths_val,
                "scales" => scales_val,
                "sid" => sid,
            ])
        } else {
            self.session.run(ort::inputs![
                "input" => input_val,
                "input_lengths" => lengths_val,
                "scales" => scales_val,
            ])
        }
        .map_err(|e| VocalisError::Synthesis(format!("inference: {e}")))?;

        let (_shape, data) = outputs["output"]
            .try_extract_tensor::<f32>()
            .map_err(|e| VocalisError::Synthesis(format!("output extract: {e}")))?;

        Ok(data.to_vec())
    }
}

impl SpeechEngine for PiperEngine {
    fn warm_up(&mut self) -> Result<()> {
        // One dummy pass populates CPU caches and forces kernel selection so
        // the first real utterance does not pay for it.
        let ids = self.symbol_ids("a");
        if ids.is_empty() {
            debug!(voice = %self.voice_id, "symbol table too sparse for warm-up pass — skipping");
            return Ok(());
        }
        let _ = self.run_inference(ids, 1.0)?;
        info!(voice = %self.voice_id, "piper voice warmed up");
        Ok(())
    }

    fn synthesize(&mut self, text: &str, speed: f32) -> Result<Synthesis> {
        let ids = self.symbol_ids(text);
        if ids.is_empty() {
            return Err(VocalisError::Synthesis(
                "no synthesizable symbols in text".into(),
            ));
        }

        let samples = self.run_inference(ids, speed)?;
        debug!(
            voice = %self.voice_id,
            samples = samples.len(),
            sample_rate = self.config.audio.sample_rate,
            "piper synthesis complete"
        );

        Ok(Synthesis {
            samples,
            sample_rate: self.config.audio.sample_rate,
        })
    }
}

fn first_id(map: &HashMap<String, Vec<i64>>, key: &str) -> Option<i64> {
    map.get(key).and_then(|ids| ids.first()).copied()
}

fn create_session(model_path: &Path) -> Result<Session> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, 8);

    SessionBuilder::new()
        .map_err(|e| VocalisError::EngineSession(e.to_string()))?
        .with_intra_threads(intra_threads)
        .map_err(|e| VocalisError::EngineSession(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| VocalisError::EngineSession(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| VocalisError::EngineSession(e.to_string()))
}

/// Factory wiring Piper voices into the synthesizer pool.
pub struct PiperFactory;

impl SynthesizerFactory for PiperFactory {
    fn create(&self, voice: &Voice) -> Result<Box<dyn SpeechEngine>> {
        Ok(Box::new(PiperEngine::load(voice)?))
    }
}
