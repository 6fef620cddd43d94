//! HTTP surface — loopback REST API over the speech pipeline.
//!
//! Admission completes before synthesis, so clients get `202` with a
//! `queued` flag; playback and synthesis failures are not surfaced here.
//! `400` is reserved for malformed input (empty text).

use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;
use vocalis_core::Admission;

use crate::selection::SELECTION_SOURCE;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/speak", post(speak))
        .route("/api/speak-selection", post(speak_selection))
        .route("/api/voices", get(voices))
        .route("/api/status", get(status))
        .route("/api/stop", post(stop))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SpeakRequest {
    #[serde(default)]
    text: String,
    source: Option<String>,
    voice: Option<String>,
}

async fn speak(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpeakRequest>,
) -> impl IntoResponse {
    match state
        .router
        .submit(&req.text, req.source.as_deref(), req.voice.as_deref())
    {
        Admission::EmptyText => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "text is required" })),
        ),
        Admission::Enqueued { request_id } => (
            StatusCode::ACCEPTED,
            Json(json!({ "queued": true, "id": request_id })),
        ),
        Admission::FilterRejected | Admission::NoSource => (
            StatusCode::ACCEPTED,
            Json(json!({ "queued": false, "id": null })),
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
struct SpeakSelectionRequest {
    voice: Option<String>,
}

async fn speak_selection(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SpeakSelectionRequest>>,
) -> impl IntoResponse {
    let voice = body.and_then(|Json(body)| body.voice);

    // The capture marshals to the UI thread and blocks for up to its
    // 300 ms window; keep that off the request pool's async threads.
    let selection = Arc::clone(&state.selection);
    let text = match tokio::task::spawn_blocking(move || selection.capture()).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "selection capture task failed");
            None
        }
    };

    let Some(text) = text else {
        return (
            StatusCode::OK,
            Json(json!({ "queued": false, "text": "" })),
        );
    };

    let admission = state
        .router
        .submit(&text, Some(SELECTION_SOURCE), voice.as_deref());
    let (queued, id) = match admission {
        Admission::Enqueued { request_id } => (true, Some(request_id)),
        _ => (false, None),
    };

    (
        StatusCode::ACCEPTED,
        Json(json!({ "queued": queued, "id": id, "text": text })),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceInfo {
    id: String,
    name: String,
    sample_rate: u32,
}

async fn voices(State(state): State<Arc<AppState>>) -> Json<Vec<VoiceInfo>> {
    let voices = state
        .catalog
        .list()
        .into_iter()
        .map(|voice| VoiceInfo {
            id: voice.id,
            name: voice.display_name,
            sample_rate: voice.sample_rate,
        })
        .collect();
    Json(voices)
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "running": true,
        "activeVoices": state.pool.loaded_voices(),
        "queueDepth": state.queue.depth(),
    }))
}

async fn stop(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.queue.stop_and_clear();
    Json(json!({ "stopped": true }))
}
