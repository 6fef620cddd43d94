//! Filesystem watcher with debounced rescans for the voices directory.
//!
//! `notify` delivers raw OS events on its own thread; they are forwarded
//! into a tokio channel and collapsed by a quiet-window debounce before a
//! rescan runs. Scheduling a new rescan supersedes any pending one —
//! dropping a twenty-file voice install triggers a single scan.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::VoiceCatalog;

/// Quiet window after the last filesystem event before a rescan fires.
pub const RESCAN_DEBOUNCE: Duration = Duration::from_millis(100);

pub(crate) struct WatcherHandle {
    /// Held so the OS watch stays registered until shutdown.
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    pub(crate) fn stop(self) {
        self.task.abort();
        // _watcher drops here, deregistering the OS watch.
    }
}

pub(crate) fn spawn(catalog: Arc<VoiceCatalog>) -> notify::Result<WatcherHandle> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_voice_artifact_event(&event) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "voices watcher error"),
    })?;
    watcher.watch(catalog.voices_dir(), RecursiveMode::NonRecursive)?;

    let task = tokio::spawn(debounce_rescans(catalog, rx));

    Ok(WatcherHandle {
        _watcher: watcher,
        task,
    })
}

/// Collapse event bursts: every event re-arms the debounce window and the
/// rescan runs only once the directory has been quiet for [`RESCAN_DEBOUNCE`].
async fn debounce_rescans(catalog: Arc<VoiceCatalog>, mut rx: mpsc::UnboundedReceiver<()>) {
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(RESCAN_DEBOUNCE, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        debug!("voices directory changed — rescanning");
        let catalog = Arc::clone(&catalog);
        // read_dir + config parsing is blocking I/O; keep it off the runtime.
        let _ = tokio::task::spawn_blocking(move || catalog.scan()).await;
    }
}

fn is_voice_artifact_event(event: &Event) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind && event.paths.iter().any(|p| is_voice_artifact(p))
}

fn is_voice_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".onnx") || name.ends_with(".onnx.json")
}
