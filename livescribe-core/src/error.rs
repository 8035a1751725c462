use thiserror::Error;

use crate::ipc::events::ErrorKind;

/// All errors produced by livescribe-core.
#[derive(Debug, Error)]
pub enum LivescribeError {
    #[error("engine init failed: {0}")]
    EngineInit(String),

    #[error("recognizer not initialized")]
    NotReady,

    #[error("audio unavailable: {0}")]
    AudioUnavailable(String),

    #[error("session has been disposed")]
    Disposed,

    #[error("capture read error: {0}")]
    CaptureRead(String),

    #[error("capture device failed: {0}")]
    CaptureFailed(String),

    #[error("recognition engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LivescribeError {
    /// Wire-level error kind reported to command callers and event sinks.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EngineInit(_) => ErrorKind::EngineInitError,
            Self::NotReady => ErrorKind::NotReady,
            Self::AudioUnavailable(_) => ErrorKind::AudioUnavailable,
            Self::Disposed => ErrorKind::DisposedError,
            Self::CaptureRead(_) | Self::CaptureFailed(_) => ErrorKind::CaptureFailed,
            Self::Engine(_) | Self::Io(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, LivescribeError>;
