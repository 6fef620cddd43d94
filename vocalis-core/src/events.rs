//! Event types broadcast by the speech queue.
//!
//! The queue publishes one `QueueEvent` per observable transition of a
//! request. Subscribers (the host binary's log forwarder, tests) attach via
//! `SpeechQueue::subscribe`.

use serde::{Deserialize, Serialize};

/// Emitted whenever a speech request changes state inside the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Id of the request this event belongs to.
    pub request_id: String,
    pub kind: QueueEventKind,
}

/// Terminal and transitional states a request can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueEventKind {
    /// The worker picked the request up and synthesis is about to run.
    Started,
    /// Playback ran to the end of the utterance.
    Completed,
    /// Playback was cut short by preemption or `stop_and_clear`.
    Cancelled,
    /// The cancel flag was raised before playback began; samples discarded.
    Skipped,
    /// Synthesis or playback reported an error.
    Failed,
    /// The request was dropped from the queue to stay within `max_depth`.
    Evicted,
}
