//! Synthesizer pool — lazy per-voice engine instantiation.
//!
//! Engine creation is expensive (model load), so a voice's engine is built
//! on first demand and retained for process lifetime. The pool map is
//! guarded by a coarse lock for insertion; each engine has its own lock
//! that serialises `synthesize` calls, because the underlying engines are
//! not safe for concurrent use on one handle. Different voices may
//! synthesize concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::catalog::VoiceCatalog;
use crate::engine::{EngineHandle, Synthesis, SynthesizerFactory};
use crate::error::{Result, VocalisError};
use crate::queue::CancelFlag;

pub struct SynthesizerPool {
    catalog: Arc<VoiceCatalog>,
    factory: Box<dyn SynthesizerFactory>,
    engines: Mutex<HashMap<String, EngineHandle>>,
}

impl SynthesizerPool {
    pub fn new(catalog: Arc<VoiceCatalog>, factory: Box<dyn SynthesizerFactory>) -> Self {
        Self {
            catalog,
            factory,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Synthesize `text` with the given voice.
    ///
    /// # Errors
    /// - `VoiceUnavailable` when `voice_id` is not in the catalog.
    /// - `TextRejected` when `text` is empty after trimming.
    /// - `Cancelled` when `cancel` was raised before the engine ran.
    /// - `Synthesis` for engine-level failures.
    pub fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        speed: f32,
        cancel: Option<&CancelFlag>,
    ) -> Result<Synthesis> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(VocalisError::TextRejected(
                "empty or whitespace-only text".into(),
            ));
        }

        let handle = self.handle_for(voice_id)?;

        // Serialise per voice; the map lock is already released.
        let mut engine = handle.0.lock();
        if cancel.is_some_and(CancelFlag::is_raised) {
            return Err(VocalisError::Cancelled);
        }
        engine.synthesize(trimmed, speed)
    }

    /// Number of voices with a live engine (for the status surface).
    pub fn loaded_voices(&self) -> usize {
        self.engines.lock().len()
    }

    /// Drop every engine handle.
    pub fn shutdown(&self) {
        let mut map = self.engines.lock();
        let dropped = map.len();
        map.clear();
        info!(engines = dropped, "synthesizer pool shut down");
    }

    /// Fetch or lazily create the engine for `voice_id`.
    ///
    /// Creation happens under the map lock so concurrent first callers
    /// cannot double-load a model.
    fn handle_for(&self, voice_id: &str) -> Result<EngineHandle> {
        let voice = self
            .catalog
            .get(voice_id)
            .ok_or_else(|| VocalisError::VoiceUnavailable {
                id: voice_id.to_string(),
            })?;

        let mut map = self.engines.lock();
        if let Some(handle) = map.get(voice_id) {
            return Ok(handle.clone());
        }

        info!(voice = %voice.id, "creating synthesizer engine");
        let mut engine = self.factory.create(&voice)?;
        engine.warm_up()?;
        let handle = EngineHandle::new(engine);
        map.insert(voice.id.clone(), handle.clone());
        debug!(voice = %voice.id, loaded = map.len(), "engine cached");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use crate::catalog::Voice;
    use crate::engine::SpeechEngine;

    fn catalog_with(ids: &[&str]) -> (tempfile::TempDir, Arc<VoiceCatalog>) {
        let dir = tempfile::tempdir().unwrap();
        for id in ids {
            std::fs::write(dir.path().join(format!("{id}.onnx")), b"onnx").unwrap();
            std::fs::write(dir.path().join(format!("{id}.onnx.json")), "{}").unwrap();
        }
        let catalog = Arc::new(VoiceCatalog::new(dir.path(), ids.first().copied().unwrap_or("")));
        catalog.scan();
        (dir, catalog)
    }

    struct Probe {
        creations: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        max_overlap: Arc<AtomicUsize>,
    }

    struct ProbeEngine {
        active: Arc<AtomicUsize>,
        max_overlap: Arc<AtomicUsize>,
    }

    impl SpeechEngine for ProbeEngine {
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }

        fn synthesize(&mut self, _text: &str, _speed: f32) -> Result<Synthesis> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_overlap.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Synthesis {
                samples: vec![0.0; 16],
                sample_rate: 22_050,
            })
        }
    }

    impl SynthesizerFactory for Probe {
        fn create(&self, _voice: &Voice) -> Result<Box<dyn SpeechEngine>> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ProbeEngine {
                active: Arc::clone(&self.active),
                max_overlap: Arc::clone(&self.max_overlap),
            }))
        }
    }

    fn probe_pool(ids: &[&str]) -> (tempfile::TempDir, Arc<SynthesizerPool>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let (dir, catalog) = catalog_with(ids);
        let creations = Arc::new(AtomicUsize::new(0));
        let max_overlap = Arc::new(AtomicUsize::new(0));
        let factory = Probe {
            creations: Arc::clone(&creations),
            active: Arc::new(AtomicUsize::new(0)),
            max_overlap: Arc::clone(&max_overlap),
        };
        let pool = Arc::new(SynthesizerPool::new(catalog, Box::new(factory)));
        (dir, pool, creations, max_overlap)
    }

    #[test]
    fn engine_is_created_once_per_voice() {
        let (_dir, pool, creations, _) = probe_pool(&["v"]);

        pool.synthesize("hi", "v", 1.0, None).unwrap();
        pool.synthesize("again", "v", 1.0, None).unwrap();

        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert_eq!(pool.loaded_voices(), 1);
    }

    #[test]
    fn concurrent_calls_on_one_voice_are_serialized() {
        let (_dir, pool, _, max_overlap) = probe_pool(&["v"]);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.synthesize("hi", "v", 1.0, None).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            max_overlap.load(Ordering::SeqCst),
            1,
            "one voice's engine must never run two synthesize calls at once"
        );
    }

    #[test]
    fn unknown_voice_fails_without_touching_the_factory() {
        let (_dir, pool, creations, _) = probe_pool(&["v"]);

        let err = pool.synthesize("hi", "ghost", 1.0, None).unwrap_err();
        assert!(matches!(err, VocalisError::VoiceUnavailable { .. }));
        assert_eq!(creations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn whitespace_only_text_is_rejected() {
        let (_dir, pool, creations, _) = probe_pool(&["v"]);

        let err = pool.synthesize("  \n\t ", "v", 1.0, None).unwrap_err();
        assert!(matches!(err, VocalisError::TextRejected(_)));
        assert_eq!(creations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn raised_cancel_flag_short_circuits_before_the_engine_runs() {
        let (_dir, pool, _, max_overlap) = probe_pool(&["v"]);

        let cancel = CancelFlag::new();
        cancel.raise();
        let err = pool.synthesize("hi", "v", 1.0, Some(&cancel)).unwrap_err();

        assert!(matches!(err, VocalisError::Cancelled));
        assert_eq!(max_overlap.load(Ordering::SeqCst), 0);
    }
}
