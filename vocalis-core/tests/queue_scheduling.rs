//! End-to-end scheduling behavior of the speech queue, driven through the
//! public API with a scripted engine and a hand-releasable audio sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use vocalis_core::catalog::VoiceCatalog;
use vocalis_core::engine::stub::StubEngine;
use vocalis_core::engine::{SpeechEngine, Synthesis, SynthesizerFactory};
use vocalis_core::error::{Result, VocalisError};
use vocalis_core::{
    AudioSink, CancelFlag, PlaybackOutcome, QueueConfig, QueueEvent, QueueEventKind, SpeechQueue,
    SpeechRequest, SynthesizerPool,
};

/// Engine factory: voices named `bad*` get an always-failing engine.
struct ScriptedFactory;

struct FailingEngine;

impl SpeechEngine for FailingEngine {
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    fn synthesize(&mut self, _text: &str, _speed: f32) -> Result<Synthesis> {
        Err(VocalisError::Synthesis("intentional test failure".into()))
    }
}

impl SynthesizerFactory for ScriptedFactory {
    fn create(&self, voice: &vocalis_core::Voice) -> Result<Box<dyn SpeechEngine>> {
        if voice.id.starts_with("bad") {
            Ok(Box::new(FailingEngine))
        } else {
            Ok(Box::new(StubEngine::new(voice.sample_rate)))
        }
    }
}

/// Sink that blocks each playback until the test releases it (or the
/// request's cancel flag aborts it).
struct ControlledSink {
    started_tx: Sender<()>,
    release_rx: Receiver<()>,
}

impl AudioSink for ControlledSink {
    fn play(&self, _samples: &[f32], _rate: u32, cancel: &CancelFlag) -> Result<PlaybackOutcome> {
        let _ = self.started_tx.send(());
        loop {
            if cancel.is_raised() {
                return Ok(PlaybackOutcome::Cancelled);
            }
            match self.release_rx.recv_timeout(Duration::from_millis(5)) {
                Ok(()) => return Ok(PlaybackOutcome::Completed),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(PlaybackOutcome::Completed),
            }
        }
    }
}

struct Harness {
    _voices_dir: tempfile::TempDir,
    queue: Arc<SpeechQueue>,
    events: broadcast::Receiver<QueueEvent>,
    started_rx: Receiver<()>,
    release_tx: Sender<()>,
}

fn harness(config: QueueConfig) -> Harness {
    let voices_dir = tempfile::tempdir().expect("create voices dir");
    for id in ["v", "bad"] {
        std::fs::write(voices_dir.path().join(format!("{id}.onnx")), b"onnx").unwrap();
        std::fs::write(voices_dir.path().join(format!("{id}.onnx.json")), "{}").unwrap();
    }
    let catalog = Arc::new(VoiceCatalog::new(voices_dir.path(), "v"));
    catalog.scan();

    let pool = Arc::new(SynthesizerPool::new(catalog, Box::new(ScriptedFactory)));
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let sink = Arc::new(ControlledSink {
        started_tx,
        release_rx,
    });

    let queue = Arc::new(SpeechQueue::new(config, pool, sink).expect("spawn queue"));
    let events = queue.subscribe();

    Harness {
        _voices_dir: voices_dir,
        queue,
        events,
        started_rx,
        release_tx,
    }
}

fn request(id: &str, priority: u32) -> SpeechRequest {
    SpeechRequest {
        id: id.into(),
        text: format!("say {id}"),
        voice_id: "v".into(),
        priority,
        source: "default".into(),
        speed: 1.0,
        cancel: CancelFlag::new(),
    }
}

fn failing_request(id: &str, priority: u32) -> SpeechRequest {
    SpeechRequest {
        voice_id: "bad".into(),
        ..request(id, priority)
    }
}

/// Scan the event stream until an event matches, or panic on timeout.
fn expect_event(
    rx: &mut broadcast::Receiver<QueueEvent>,
    timeout: Duration,
    mut pred: impl FnMut(&QueueEvent) -> bool,
) -> QueueEvent {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(ev) if pred(&ev) => return ev,
            Ok(_) => continue,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for queue event");
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("queue event channel closed unexpectedly"),
        }
    }
}

fn assert_no_event_matching(
    rx: &mut broadcast::Receiver<QueueEvent>,
    window: Duration,
    mut pred: impl FnMut(&QueueEvent) -> bool,
) {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(ev) => {
                assert!(
                    !pred(&ev),
                    "unexpected event: {:?} for request {}",
                    ev.kind,
                    ev.request_id
                );
            }
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= window {
                    return;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return,
        }
    }
}

fn wait_started(h: &Harness) {
    h.started_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("playback should start");
}

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[test]
fn equal_priority_requests_play_in_fifo_order() {
    let mut h = harness(QueueConfig {
        max_depth: 3,
        interrupt_on_higher_priority: true,
    });

    h.queue.enqueue(request("a", 3));
    h.queue.enqueue(request("b", 3));
    h.queue.enqueue(request("c", 3));

    for expected in ["a", "b", "c"] {
        wait_started(&h);
        let started = expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
            e.kind == QueueEventKind::Started
        });
        assert_eq!(started.request_id, expected);
        h.release_tx.send(()).unwrap();
        expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
            e.kind == QueueEventKind::Completed && e.request_id == expected
        });
    }

    assert_eq!(h.queue.depth(), 0);
    h.queue.shutdown();
}

#[test]
fn more_urgent_arrival_preempts_and_is_not_retried() {
    let mut h = harness(QueueConfig {
        max_depth: 3,
        interrupt_on_higher_priority: true,
    });

    h.queue.enqueue(request("a", 3));
    wait_started(&h);

    h.queue.enqueue(request("b", 1));

    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Cancelled && e.request_id == "a"
    });

    wait_started(&h);
    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Started && e.request_id == "b"
    });
    h.release_tx.send(()).unwrap();
    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Completed && e.request_id == "b"
    });

    // "a" must not come back.
    assert_no_event_matching(&mut h.events, Duration::from_millis(150), |e| {
        e.request_id == "a"
    });
    assert_eq!(h.queue.depth(), 0);
    h.queue.shutdown();
}

#[test]
fn less_urgent_arrival_waits_for_current_playback() {
    let mut h = harness(QueueConfig {
        max_depth: 3,
        interrupt_on_higher_priority: true,
    });

    h.queue.enqueue(request("a", 1));
    wait_started(&h);

    h.queue.enqueue(request("b", 3));

    assert_no_event_matching(&mut h.events, Duration::from_millis(100), |e| {
        e.kind == QueueEventKind::Cancelled
    });

    h.release_tx.send(()).unwrap();
    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Completed && e.request_id == "a"
    });

    wait_started(&h);
    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Started && e.request_id == "b"
    });
    h.release_tx.send(()).unwrap();
    h.queue.shutdown();
}

#[test]
fn equal_priority_arrival_does_not_preempt() {
    let mut h = harness(QueueConfig {
        max_depth: 3,
        interrupt_on_higher_priority: true,
    });

    h.queue.enqueue(request("a", 3));
    wait_started(&h);
    h.queue.enqueue(request("b", 3));

    assert_no_event_matching(&mut h.events, Duration::from_millis(100), |e| {
        e.kind == QueueEventKind::Cancelled
    });

    h.release_tx.send(()).unwrap();
    h.release_tx.send(()).unwrap();
    h.queue.shutdown();
}

#[test]
fn overflow_evicts_oldest_queued_item_never_the_playing_one() {
    let mut h = harness(QueueConfig {
        max_depth: 3,
        interrupt_on_higher_priority: true,
    });

    h.queue.enqueue(request("x", 3));
    wait_started(&h); // x is playing and blocked in the sink

    h.queue.enqueue(request("y", 3));
    h.queue.enqueue(request("z", 3));
    assert_eq!(h.queue.depth(), 2);

    // Occupancy is at max_depth; w forces one eviction: y (oldest queued).
    h.queue.enqueue(request("w", 3));
    assert_eq!(h.queue.depth(), 2);

    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Evicted && e.request_id == "y"
    });

    h.release_tx.send(()).unwrap();
    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Completed && e.request_id == "x"
    });

    for expected in ["z", "w"] {
        wait_started(&h);
        let started = expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
            e.kind == QueueEventKind::Started && e.request_id != "x"
        });
        assert_eq!(started.request_id, expected);
        h.release_tx.send(()).unwrap();
    }

    assert_no_event_matching(&mut h.events, Duration::from_millis(100), |e| {
        e.request_id == "y" && e.kind == QueueEventKind::Started
    });
    h.queue.shutdown();
}

#[test]
fn urgent_items_dequeue_before_older_less_urgent_ones() {
    let mut h = harness(QueueConfig {
        max_depth: 10,
        interrupt_on_higher_priority: false,
    });

    h.queue.enqueue(request("hold", 0));
    wait_started(&h);

    h.queue.enqueue(request("background", 5));
    h.queue.enqueue(request("urgent", 1));
    h.queue.enqueue(request("normal", 3));

    h.release_tx.send(()).unwrap();

    for expected in ["urgent", "normal", "background"] {
        wait_started(&h);
        let started = expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
            e.kind == QueueEventKind::Started && e.request_id != "hold"
        });
        assert_eq!(started.request_id, expected);
        h.release_tx.send(()).unwrap();
    }
    h.queue.shutdown();
}

#[test]
fn stop_and_clear_cancels_current_and_empties_queue() {
    let mut h = harness(QueueConfig {
        max_depth: 5,
        interrupt_on_higher_priority: true,
    });

    h.queue.enqueue(request("playing", 3));
    wait_started(&h);
    h.queue.enqueue(request("queued-1", 3));
    h.queue.enqueue(request("queued-2", 3));
    assert_eq!(h.queue.depth(), 2);

    h.queue.stop_and_clear();

    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Cancelled && e.request_id == "playing"
    });
    assert_eq!(h.queue.depth(), 0);
    assert_no_event_matching(&mut h.events, Duration::from_millis(150), |e| {
        e.kind == QueueEventKind::Started
    });
    h.queue.shutdown();
}

#[test]
fn synthesis_failure_is_absorbed_and_the_worker_continues() {
    let mut h = harness(QueueConfig {
        max_depth: 5,
        interrupt_on_higher_priority: true,
    });

    h.queue.enqueue(failing_request("doomed", 3));
    h.queue.enqueue(request("fine", 3));

    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Failed && e.request_id == "doomed"
    });

    wait_started(&h);
    h.release_tx.send(()).unwrap();
    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Completed && e.request_id == "fine"
    });
    h.queue.shutdown();
}

#[test]
fn depth_cap_of_one_still_admits_alongside_the_playing_item() {
    let mut h = harness(QueueConfig {
        max_depth: 1,
        interrupt_on_higher_priority: false,
    });

    h.queue.enqueue(request("first", 3));
    wait_started(&h);

    // Only `current` occupies the cap and the queue is empty: nothing is
    // evictable, and the arrival is admitted anyway.
    h.queue.enqueue(request("second", 3));
    assert_eq!(h.queue.depth(), 1);

    h.release_tx.send(()).unwrap();
    wait_started(&h);
    expect_event(&mut h.events, EVENT_TIMEOUT, |e| {
        e.kind == QueueEventKind::Started && e.request_id == "second"
    });
    h.release_tx.send(()).unwrap();
    h.queue.shutdown();
}

#[test]
fn shutdown_stops_the_worker_without_draining_pending_items() {
    let mut h = harness(QueueConfig {
        max_depth: 5,
        interrupt_on_higher_priority: true,
    });

    h.queue.enqueue(request("playing", 3));
    wait_started(&h);
    h.queue.enqueue(request("never-played", 3));

    h.queue.shutdown();

    assert_no_event_matching(&mut h.events, Duration::from_millis(150), |e| {
        e.request_id == "never-played" && e.kind == QueueEventKind::Started
    });
}
