//! Recognition engine capability.
//!
//! The engine itself lives outside this crate (Vosk, Kaldi, a remote
//! service…). These traits are the seam: an engine loads a model, a model
//! creates recognizers, a recognizer consumes PCM and reports partial or
//! final hypotheses as structured JSON.
//!
//! Closing a handle is `Drop`. The session keeps each handle in exactly one
//! owned `Box`, so every model and recognizer is released exactly once.
//!
//! `&mut self` on the recognizer expresses that decoders are stateful; the
//! session gives the recognizer to the capture thread for the duration of a
//! recording, so no lock is taken per frame.

pub mod stub;

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::Result;

/// Entry point of a recognition engine.
pub trait SpeechEngine: Send + Sync + 'static {
    /// Load the model at `path`.
    ///
    /// # Errors
    /// Any error; the session reports it as `EngineInitError`.
    fn load_model(&self, path: &Path) -> Result<Box<dyn SpeechModel>>;
}

/// A loaded model.
pub trait SpeechModel: Send + 'static {
    /// Create a recognizer for PCM16 mono audio at `sample_rate`.
    fn create_recognizer(&self, sample_rate: u32) -> Result<Box<dyn Recognizer>>;
}

/// A streaming decoder.
pub trait Recognizer: Send + 'static {
    /// Feed one frame of little-endian PCM16.
    ///
    /// Returns `true` when an utterance boundary was reached with this frame.
    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<bool>;

    /// Hypothesis for the utterance in progress, e.g. `{"partial": "turn le"}`.
    fn partial_result(&mut self) -> Value;

    /// Result for the utterance just completed, e.g. `{"text": "turn left"}`.
    fn final_result(&mut self) -> Value;
}

/// Loaded model plus its recognizer, released together.
///
/// Field order matters: the recognizer drops before the model it was built
/// from.
pub struct EngineHandle {
    pub(crate) recognizer: Box<dyn Recognizer>,
    pub(crate) model: Box<dyn SpeechModel>,
    pub(crate) model_path: PathBuf,
    pub(crate) sample_rate: u32,
}

impl EngineHandle {
    /// Load `model_path` and build a recognizer for `sample_rate`.
    ///
    /// Nothing is kept on failure: a model whose recognizer could not be
    /// created is dropped before returning.
    pub fn load(engine: &dyn SpeechEngine, model_path: &Path, sample_rate: u32) -> Result<Self> {
        let model = engine.load_model(model_path)?;
        let recognizer = model.create_recognizer(sample_rate)?;
        Ok(Self {
            recognizer,
            model,
            model_path: model_path.to_path_buf(),
            sample_rate,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("model_path", &self.model_path)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}
