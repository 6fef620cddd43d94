//! Priority speech queue — serial playback with preemption and eviction.
//!
//! ## Shape
//!
//! ```text
//! producers (HTTP handlers, hotkey thread)
//!     │ enqueue / stop_and_clear          (never block, never suspend)
//!     ▼
//! Mutex<QueueState>  ──wake──►  worker thread (one)
//!                                   │ synthesize (pool)
//!                                   │ play (sink, cancellable)
//!                                   ▼
//!                              broadcast::Sender<QueueEvent>
//! ```
//!
//! The queue lock guards only constant-time state mutation; synthesis and
//! playback run on the worker thread with no lock held.
//!
//! ## Scheduling rules
//!
//! - Dequeue order is (`priority` ascending, `enqueue_seq` ascending):
//!   lower numbers are more urgent, ties are FIFO.
//! - `{queued} ∪ {playing}` never exceeds `max_depth`; overflow evicts the
//!   oldest item at the least-urgent priority. The playing item is exempt.
//! - With `interrupt_on_higher_priority`, a strictly more urgent arrival
//!   raises the playing item's cancel flag; equal priority never preempts.

pub mod worker;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::audio::AudioSink;
use crate::error::Result;
use crate::events::{QueueEvent, QueueEventKind};
use crate::synth::SynthesizerPool;

/// Broadcast channel capacity: 256 queue events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for [`SpeechQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Cap on `{queued items} ∪ {playing item}`. Clamped to at least 1.
    pub max_depth: usize,
    /// Whether a strictly more urgent arrival cancels the playing item.
    pub interrupt_on_higher_priority: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            interrupt_on_higher_priority: true,
        }
    }
}

/// Shared cancellation signal for one request.
///
/// Raised by preemption or `stop_and_clear`; observed by the synthesizer
/// pool pre-flight check and by the audio sink during playback.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One admitted utterance. Immutable after enqueue except for `cancel`.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    /// Opaque unique id, assigned by the router at admission.
    pub id: String,
    /// Utterance text, non-empty after trimming.
    pub text: String,
    /// Resolved voice id (override > source > catalog default).
    pub voice_id: String,
    /// Lower is more urgent.
    pub priority: u32,
    /// Name of the source this request was admitted under.
    pub source: String,
    /// Speaking-rate multiplier.
    pub speed: f32,
    pub cancel: CancelFlag,
}

pub(crate) struct CurrentPlayback {
    pub(crate) request_id: String,
    pub(crate) priority: u32,
    pub(crate) cancel: CancelFlag,
}

#[derive(Default)]
pub(crate) struct QueueState {
    /// Keyed by (priority, enqueue_seq): iteration order is dequeue order.
    pub(crate) pending: BTreeMap<(u32, u64), SpeechRequest>,
    pub(crate) current: Option<CurrentPlayback>,
    pub(crate) next_seq: u64,
}

/// Bounded priority queue with a single playback worker thread.
pub struct SpeechQueue {
    config: QueueConfig,
    state: Arc<Mutex<QueueState>>,
    running: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    shutdown_tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    events_tx: broadcast::Sender<QueueEvent>,
    event_seq: Arc<AtomicU64>,
}

impl SpeechQueue {
    /// Create the queue and spawn its worker thread.
    pub fn new(
        config: QueueConfig,
        pool: Arc<SynthesizerPool>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self> {
        let config = QueueConfig {
            max_depth: config.max_depth.max(1),
            ..config
        };

        let state = Arc::new(Mutex::new(QueueState::default()));
        let running = Arc::new(AtomicBool::new(true));
        // Capacity-1 saturating wake signal: one pending wake is enough.
        let (wake_tx, wake_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (events_tx, _) = broadcast::channel(BROADCAST_CAP);
        let event_seq = Arc::new(AtomicU64::new(0));

        let ctx = worker::WorkerContext {
            state: Arc::clone(&state),
            running: Arc::clone(&running),
            wake_rx,
            shutdown_rx,
            pool,
            sink,
            events_tx: events_tx.clone(),
            event_seq: Arc::clone(&event_seq),
        };

        let handle = std::thread::Builder::new()
            .name("vocalis-queue".into())
            .spawn(move || worker::run(ctx))?;

        Ok(Self {
            config,
            state,
            running,
            wake_tx,
            shutdown_tx,
            worker: Mutex::new(Some(handle)),
            events_tx,
            event_seq,
        })
    }

    /// Admit a request. Never blocks on capacity: overflow evicts instead.
    ///
    /// Returns the request id.
    pub fn enqueue(&self, request: SpeechRequest) -> String {
        let id = request.id.clone();
        let mut evicted = None;
        let mut preempted = None;

        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;

            let occupancy = state.pending.len() + usize::from(state.current.is_some());
            if occupancy >= self.config.max_depth {
                // When only the playing item occupies the queue there is
                // nothing evictable and the arrival is admitted regardless.
                evicted = evict_least_urgent(&mut state.pending);
            }

            if self.config.interrupt_on_higher_priority {
                if let Some(current) = &state.current {
                    if request.priority < current.priority && !current.cancel.is_raised() {
                        current.cancel.raise();
                        preempted = Some(current.request_id.clone());
                    }
                }
            }

            state.pending.insert((request.priority, seq), request);
        }

        if let Some(victim) = evicted {
            info!(
                evicted = %victim.id,
                priority = victim.priority,
                "queue full — evicted oldest least-urgent item"
            );
            self.emit(&victim.id, QueueEventKind::Evicted);
        }
        if let Some(current_id) = preempted {
            info!(
                preempted = %current_id,
                arriving = %id,
                "more urgent arrival — cancelling current playback"
            );
        }

        self.wake();
        id
    }

    /// Cancel the in-flight playback (if any) and drop every queued item.
    ///
    /// Returns once both effects are ordered; it does not wait for the audio
    /// sink to finish tearing down.
    pub fn stop_and_clear(&self) {
        let dropped;
        {
            let mut state = self.state.lock();
            if let Some(current) = &state.current {
                current.cancel.raise();
            }
            dropped = state.pending.len();
            state.pending.clear();
            // `current` stays set; the worker clears it in its epilogue.
        }
        self.wake();
        info!(dropped, "stop requested — queue cleared and current playback cancelled");
    }

    /// Number of queued items, excluding the in-flight one.
    pub fn depth(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Subscribe to request lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    /// Stop the worker and join it. Queued items are discarded.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        {
            let state = self.state.lock();
            if let Some(current) = &state.current {
                current.cancel.raise();
            }
        }
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("queue worker panicked during shutdown");
            }
        }
    }

    fn wake(&self) {
        // A full channel already carries a pending wake; dropping the
        // signal is correct.
        let _ = self.wake_tx.try_send(());
    }

    fn emit(&self, request_id: &str, kind: QueueEventKind) {
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.events_tx.send(QueueEvent {
            seq,
            request_id: request_id.to_string(),
            kind,
        });
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Remove the eviction victim: the oldest (smallest seq) item at the
/// largest priority value. Returns `None` when nothing is queued.
fn evict_least_urgent(
    pending: &mut BTreeMap<(u32, u64), SpeechRequest>,
) -> Option<SpeechRequest> {
    let (&(least_urgent, _), _) = pending.iter().next_back()?;
    let key = *pending.range((least_urgent, 0)..).next().map(|(k, _)| k)?;
    pending.remove(&key)
}
