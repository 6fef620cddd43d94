//! Blocking queue worker loop.
//!
//! ## Per-iteration shape
//!
//! ```text
//! 1. Pop the (priority, enqueue_seq)-minimum request; mark it current
//! 2. Synthesize through the pool (not cancellable mid-call)
//! 3. If the cancel flag was raised meanwhile: discard samples, skip playback
//! 4. Play through the sink (blocks until finished or cancelled)
//! 5. Clear current; emit the terminal QueueEvent
//! ```
//!
//! Synthesis failures, playback failures and cancellations are
//! individual-request outcomes: logged, broadcast, absorbed. Only the
//! shutdown signal ends the loop. When the queue is empty the worker parks
//! on the wake channel rather than spinning.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{select, Receiver};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::audio::{AudioSink, PlaybackOutcome};
use crate::error::VocalisError;
use crate::events::{QueueEvent, QueueEventKind};
use crate::synth::SynthesizerPool;

use super::{CurrentPlayback, QueueState, SpeechRequest};

/// All context the worker needs, passed as one struct so the thread closure
/// stays tidy.
pub(crate) struct WorkerContext {
    pub(crate) state: Arc<Mutex<QueueState>>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) wake_rx: Receiver<()>,
    pub(crate) shutdown_rx: Receiver<()>,
    pub(crate) pool: Arc<SynthesizerPool>,
    pub(crate) sink: Arc<dyn AudioSink>,
    pub(crate) events_tx: broadcast::Sender<QueueEvent>,
    pub(crate) event_seq: Arc<AtomicU64>,
}

/// Run the worker until shutdown is signalled.
pub(crate) fn run(ctx: WorkerContext) {
    info!("speech queue worker started");

    loop {
        if !ctx.running.load(Ordering::SeqCst) {
            break;
        }

        let Some(request) = take_next(&ctx.state) else {
            select! {
                recv(ctx.wake_rx) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                }
                recv(ctx.shutdown_rx) -> _ => break,
            }
            continue;
        };

        process(&ctx, &request);
        ctx.state.lock().current = None;
    }

    info!("speech queue worker stopped");
}

/// Pop the minimum (priority, enqueue_seq) request and mark it current,
/// atomically under the queue lock.
fn take_next(state: &Arc<Mutex<QueueState>>) -> Option<SpeechRequest> {
    let mut state = state.lock();
    let key = *state.pending.keys().next()?;
    let request = state.pending.remove(&key)?;
    state.current = Some(CurrentPlayback {
        request_id: request.id.clone(),
        priority: request.priority,
        cancel: request.cancel.clone(),
    });
    Some(request)
}

fn process(ctx: &WorkerContext, request: &SpeechRequest) {
    emit(ctx, &request.id, QueueEventKind::Started);
    debug!(
        request_id = %request.id,
        voice = %request.voice_id,
        priority = request.priority,
        source = %request.source,
        "processing speech request"
    );

    let synthesis = match ctx.pool.synthesize(
        &request.text,
        &request.voice_id,
        request.speed,
        Some(&request.cancel),
    ) {
        Ok(synthesis) => synthesis,
        Err(VocalisError::Cancelled) => {
            info!(request_id = %request.id, "request cancelled before synthesis");
            emit(ctx, &request.id, QueueEventKind::Skipped);
            return;
        }
        Err(e) => {
            error!(request_id = %request.id, error = %e, "synthesis failed");
            emit(ctx, &request.id, QueueEventKind::Failed);
            return;
        }
    };

    // Synthesis is not cancellable mid-call; a flag raised while it ran
    // means the samples are discarded and playback never starts.
    if request.cancel.is_raised() {
        info!(request_id = %request.id, "cancelled between synthesis and playback — discarding samples");
        emit(ctx, &request.id, QueueEventKind::Skipped);
        return;
    }

    match ctx
        .sink
        .play(&synthesis.samples, synthesis.sample_rate, &request.cancel)
    {
        Ok(PlaybackOutcome::Completed) => {
            debug!(request_id = %request.id, samples = synthesis.samples.len(), "playback complete");
            emit(ctx, &request.id, QueueEventKind::Completed);
        }
        Ok(PlaybackOutcome::Cancelled) => {
            info!(request_id = %request.id, "playback cancelled");
            emit(ctx, &request.id, QueueEventKind::Cancelled);
        }
        Err(e) => {
            error!(request_id = %request.id, error = %e, "playback failed");
            emit(ctx, &request.id, QueueEventKind::Failed);
        }
    }
}

fn emit(ctx: &WorkerContext, request_id: &str, kind: QueueEventKind) {
    let seq = ctx.event_seq.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.events_tx.send(QueueEvent {
        seq,
        request_id: request_id.to_string(),
        kind,
    });
}
