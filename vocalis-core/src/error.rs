use thiserror::Error;

/// All errors produced by vocalis-core.
#[derive(Debug, Error)]
pub enum VocalisError {
    #[error("voice not available: {id}")]
    VoiceUnavailable { id: String },

    #[error("text rejected: {0}")]
    TextRejected(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("playback cancelled")]
    Cancelled,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("engine session error: {0}")]
    EngineSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("voice config error: {0}")]
    VoiceConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VocalisError>;
