//! Voice catalog — on-disk voice discovery and hot reload.
//!
//! ## Layout on disk
//!
//! A flat voices directory holding Piper-style model pairs:
//!
//! ```text
//! voices/
//!   en_US-amy-medium.onnx
//!   en_US-amy-medium.onnx.json
//! ```
//!
//! The voice id is the model basename without the `.onnx` extension. A model
//! without its sibling config is an orphan and is excluded from the index.
//!
//! ## Publication
//!
//! A scan builds a complete `VoiceIndex` and publishes it through an
//! `ArcSwap`. Readers take a cheap snapshot reference and never observe a
//! partially built index; the old snapshot is released when the last reader
//! drops it.

pub mod watcher;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{Result, VocalisError};

/// Sample rate assumed when a voice config does not carry `audio.sample_rate`.
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// One synthesizable voice backed by a model/config pair on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Model basename without the `.onnx` extension.
    pub id: String,
    /// Human-facing name; currently equal to the id.
    pub display_name: String,
    /// Absolute path to the `.onnx` model artifact.
    pub model_path: PathBuf,
    /// Absolute path to the `.onnx.json` config artifact.
    pub config_path: PathBuf,
    /// Output sample rate parsed from `audio.sample_rate`.
    pub sample_rate: u32,
}

/// Immutable snapshot of every well-formed voice found by one scan.
#[derive(Debug, Default)]
pub struct VoiceIndex {
    voices: BTreeMap<String, Voice>,
}

impl VoiceIndex {
    pub fn get(&self, id: &str) -> Option<&Voice> {
        self.voices.get(id)
    }

    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.values()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

/// Thread-safe voice index with hot reload.
///
/// Many concurrent readers, one writer at publication time. Reads never
/// block for the duration of a scan.
pub struct VoiceCatalog {
    voices_dir: PathBuf,
    default_voice_id: String,
    index: ArcSwap<VoiceIndex>,
    watcher: Mutex<Option<watcher::WatcherHandle>>,
}

impl VoiceCatalog {
    /// Create a catalog over `voices_dir`. Does not scan — call [`scan`]
    /// once at startup, then [`spawn_watcher`] for hot reload.
    ///
    /// [`scan`]: VoiceCatalog::scan
    /// [`spawn_watcher`]: VoiceCatalog::spawn_watcher
    pub fn new(voices_dir: impl Into<PathBuf>, default_voice_id: impl Into<String>) -> Self {
        Self {
            voices_dir: voices_dir.into(),
            default_voice_id: default_voice_id.into(),
            index: ArcSwap::from_pointee(VoiceIndex::default()),
            watcher: Mutex::new(None),
        }
    }

    pub fn voices_dir(&self) -> &Path {
        &self.voices_dir
    }

    pub fn default_voice_id(&self) -> &str {
        &self.default_voice_id
    }

    /// Rebuild the index from disk and publish it atomically.
    ///
    /// A malformed config or an orphan model excludes that voice only. A
    /// directory-read failure keeps the previous snapshot. A missing
    /// directory is created; if creation fails an empty index is published.
    pub fn scan(&self) {
        if !self.voices_dir.is_dir() {
            if let Err(e) = std::fs::create_dir_all(&self.voices_dir) {
                warn!(
                    dir = %self.voices_dir.display(),
                    error = %e,
                    "voices directory missing and could not be created"
                );
                self.index.store(Arc::new(VoiceIndex::default()));
                return;
            }
        }

        match build_index(&self.voices_dir) {
            Ok(index) => {
                info!(
                    voices = index.len(),
                    dir = %self.voices_dir.display(),
                    "voice catalog published"
                );
                self.index.store(Arc::new(index));
            }
            Err(e) => {
                warn!(
                    dir = %self.voices_dir.display(),
                    error = %e,
                    "voices directory scan failed — keeping previous catalog"
                );
            }
        }
    }

    /// Cheap reference to the current published snapshot.
    pub fn snapshot(&self) -> Arc<VoiceIndex> {
        self.index.load_full()
    }

    /// Snapshot of all voices, ordered by id.
    pub fn list(&self) -> Vec<Voice> {
        self.snapshot().voices().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Voice> {
        self.snapshot().get(id).cloned()
    }

    pub fn voice_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Resolve a requested voice id against the catalog.
    ///
    /// Returns `requested` when it names a present voice, otherwise the
    /// configured default voice id. The default is returned even when it is
    /// itself absent — synthesis will then fail with `VoiceUnavailable`,
    /// which is the caller's signal that the catalog has no usable voice.
    pub fn resolve(&self, requested: Option<&str>) -> String {
        match requested {
            Some(id) if !id.is_empty() => {
                if self.snapshot().get(id).is_some() {
                    id.to_string()
                } else {
                    warn!(
                        requested = id,
                        fallback = %self.default_voice_id,
                        "requested voice not in catalog — using default"
                    );
                    self.default_voice_id.clone()
                }
            }
            _ => self.default_voice_id.clone(),
        }
    }

    /// Start watching the voices directory for artifact changes.
    pub fn spawn_watcher(self: &Arc<Self>) -> Result<()> {
        let handle = watcher::spawn(Arc::clone(self))
            .map_err(|e| VocalisError::Other(anyhow::anyhow!("voices watcher: {e}")))?;
        *self.watcher.lock() = Some(handle);
        Ok(())
    }

    /// Stop the watcher and release its resources. Idempotent.
    pub fn shutdown(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.stop();
        }
    }
}

fn build_index(dir: &Path) -> std::io::Result<VoiceIndex> {
    let mut voices = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "unreadable directory entry — skipping");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("onnx") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let config_path = sibling_config_path(&path);
        if !config_path.is_file() {
            warn!(voice = %id, "model has no matching config — skipping orphan");
            continue;
        }

        let sample_rate = match read_sample_rate(&config_path) {
            Ok(rate) => rate,
            Err(e) => {
                warn!(voice = %id, error = %e, "voice config unparseable — skipping");
                continue;
            }
        };

        voices.insert(
            id.clone(),
            Voice {
                display_name: id.clone(),
                id,
                model_path: absolutize(path),
                config_path: absolutize(config_path),
                sample_rate,
            },
        );
    }

    Ok(VoiceIndex { voices })
}

/// `voices/v.onnx` → `voices/v.onnx.json`.
fn sibling_config_path(model_path: &Path) -> PathBuf {
    let mut os = model_path.as_os_str().to_os_string();
    os.push(".json");
    PathBuf::from(os)
}

fn absolutize(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

/// Extract a positive `audio.sample_rate`, defaulting when absent.
/// A config that is not valid JSON is an error (the voice is excluded).
fn read_sample_rate(config_path: &Path) -> std::result::Result<u32, String> {
    let raw = std::fs::read_to_string(config_path).map_err(|e| e.to_string())?;
    let config: serde_json::Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    Ok(config
        .pointer("/audio/sample_rate")
        .and_then(|v| v.as_u64())
        .filter(|&rate| rate > 0)
        .map(|rate| rate as u32)
        .unwrap_or(DEFAULT_SAMPLE_RATE))
}
