//! Shared application state, injected into axum handlers and the hotkey
//! worker.

use std::sync::Arc;

use vocalis_core::{SourceRouter, SpeechQueue, SynthesizerPool, VoiceCatalog};

use crate::selection::SelectionCapture;

pub struct AppState {
    pub catalog: Arc<VoiceCatalog>,
    pub pool: Arc<SynthesizerPool>,
    pub queue: Arc<SpeechQueue>,
    pub router: Arc<SourceRouter>,
    pub selection: Arc<SelectionCapture>,
}
