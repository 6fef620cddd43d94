//! Vocalis service entry point.
//!
//! Boot order: tracing → config → voice catalog (+ watcher) → synthesizer
//! pool → audio sink → speech queue → source router → UI context → hotkeys
//! → loopback HTTP server. Ctrl-C drains the queue and stops the workers.

mod config;
mod hotkeys;
mod http;
mod selection;
mod state;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use vocalis_core::engine::stub::StubEngine;
use vocalis_core::engine::{PiperFactory, SpeechEngine, SynthesizerFactory};
use vocalis_core::{
    CpalSink, QueueConfig, SourceRouter, SpeechQueue, SynthesizerPool, VoiceCatalog,
};

use crate::selection::SelectionCapture;
use crate::state::AppState;

/// Placeholder-audio factory for running without voice models
/// (`VOCALIS_ENGINE=stub`).
struct StubFactory;

impl SynthesizerFactory for StubFactory {
    fn create(
        &self,
        voice: &vocalis_core::Voice,
    ) -> vocalis_core::error::Result<Box<dyn SpeechEngine>> {
        Ok(Box::new(StubEngine::new(voice.sample_rate)))
    }
}

fn resolve_config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    if let Some(path) = std::env::var_os("VOCALIS_CONFIG") {
        return PathBuf::from(path);
    }
    config::default_config_path()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VOCALIS_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = resolve_config_path();
    info!(config = %config_path.display(), "starting vocalis");
    let app_config = config::load_config(&config_path);

    if app_config.service.default_voice.is_empty() {
        warn!("service.defaultVoice is not set — requests without an explicit voice will fail");
    }

    // ── Voice catalog ────────────────────────────────────────────────────
    let catalog = Arc::new(VoiceCatalog::new(
        app_config.voices_dir(),
        app_config.service.default_voice.clone(),
    ));
    catalog.scan();
    catalog.spawn_watcher().context("start voices watcher")?;

    // ── Synthesizer pool ─────────────────────────────────────────────────
    let factory: Box<dyn SynthesizerFactory> =
        if matches!(std::env::var("VOCALIS_ENGINE").as_deref(), Ok("stub")) {
            warn!("VOCALIS_ENGINE=stub — synthesizing placeholder audio");
            Box::new(StubFactory)
        } else {
            Box::new(PiperFactory)
        };
    let pool = Arc::new(SynthesizerPool::new(Arc::clone(&catalog), factory));

    // ── Speech queue over the audio sink ─────────────────────────────────
    for device in vocalis_core::audio::device::list_output_devices() {
        debug!(name = %device.name, default = device.is_default, "output device");
    }
    let sink = Arc::new(CpalSink::new(app_config.service.output_device.clone()));
    let queue = Arc::new(
        SpeechQueue::new(
            QueueConfig {
                max_depth: app_config.service.max_queue_depth,
                interrupt_on_higher_priority: app_config.service.interrupt_on_higher_priority,
            },
            Arc::clone(&pool),
            sink,
        )
        .context("spawn speech queue")?,
    );

    // ── Router + UI context ──────────────────────────────────────────────
    let router = Arc::new(SourceRouter::new(
        Arc::clone(&catalog),
        Arc::clone(&queue),
        app_config.sources.clone(),
    ));
    let selection = Arc::new(SelectionCapture::spawn().context("spawn UI context thread")?);

    let state = Arc::new(AppState {
        catalog: Arc::clone(&catalog),
        pool: Arc::clone(&pool),
        queue: Arc::clone(&queue),
        router,
        selection,
    });

    hotkeys::spawn(app_config.hotkeys.clone(), Arc::clone(&state));
    spawn_event_logger(&state);

    // ── HTTP surface (loopback only) ─────────────────────────────────────
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, app_config.service.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, voices = catalog.voice_count(), "vocalis listening");

    axum::serve(listener, http::create_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP")?;

    // ── Teardown ─────────────────────────────────────────────────────────
    state.queue.stop_and_clear();
    state.queue.shutdown();
    state.pool.shutdown();
    state.catalog.shutdown();
    info!("vocalis stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed");
    }
    info!("shutdown signal received");
}

fn spawn_event_logger(state: &Arc<AppState>) {
    let mut events = state.queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(request_id = %event.request_id, kind = ?event.kind, "queue event");
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
