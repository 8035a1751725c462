//! `StubEngine`: placeholder backend that reports audio metadata instead of
//! words.
//!
//! Lets the host and the full capture → event pipeline run end-to-end
//! without a real model on disk. Every frame yields a partial; once one
//! second of audio has been accepted the frame closes an utterance and a
//! final result is reported.

use std::path::Path;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{LivescribeError, Result};
use crate::inference::{Recognizer, SpeechEngine, SpeechModel};

#[derive(Debug, Default, Clone)]
pub struct StubEngine;

impl SpeechEngine for StubEngine {
    fn load_model(&self, path: &Path) -> Result<Box<dyn SpeechModel>> {
        if path.as_os_str().is_empty() {
            return Err(LivescribeError::Engine("model path is empty".into()));
        }
        debug!(path = %path.display(), "StubEngine::load_model");
        Ok(Box::new(StubModel))
    }
}

struct StubModel;

impl SpeechModel for StubModel {
    fn create_recognizer(&self, sample_rate: u32) -> Result<Box<dyn Recognizer>> {
        if sample_rate == 0 {
            return Err(LivescribeError::Engine("sample rate must be positive".into()));
        }
        Ok(Box::new(StubRecognizer {
            sample_rate,
            samples_in_utterance: 0,
            last_utterance_samples: 0,
            utterances: 0,
        }))
    }
}

struct StubRecognizer {
    sample_rate: u32,
    samples_in_utterance: usize,
    last_utterance_samples: usize,
    utterances: u32,
}

impl Recognizer for StubRecognizer {
    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<bool> {
        self.samples_in_utterance += pcm.len() / 2;
        if self.samples_in_utterance >= self.sample_rate as usize {
            self.utterances += 1;
            self.last_utterance_samples = self.samples_in_utterance;
            self.samples_in_utterance = 0;
            return Ok(true);
        }
        Ok(false)
    }

    fn partial_result(&mut self) -> Value {
        json!({ "partial": format!("\u{2026} {} samples", self.samples_in_utterance) })
    }

    fn final_result(&mut self) -> Value {
        json!({
            "text": format!(
                "[stub utterance {}: {} samples @ {} Hz]",
                self.utterances, self.last_utterance_samples, self.sample_rate
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_model_path_fails_to_load() {
        assert!(StubEngine.load_model(Path::new("")).is_err());
    }

    #[test]
    fn one_second_of_audio_closes_an_utterance() {
        let model = StubEngine.load_model(Path::new("models/stub")).expect("load");
        let mut rec = model.create_recognizer(8_000).expect("recognizer");

        // 0.5 s per frame at 8 kHz mono16
        let frame = vec![0u8; 8_000];
        assert!(!rec.accept_waveform(&frame).expect("accept"));
        assert_eq!(rec.partial_result()["partial"], "\u{2026} 4000 samples");
        assert!(rec.accept_waveform(&frame).expect("accept"));
        assert_eq!(
            rec.final_result()["text"],
            "[stub utterance 1: 8000 samples @ 8000 Hz]"
        );
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let model = StubEngine.load_model(Path::new("m")).expect("load");
        assert!(model.create_recognizer(0).is_err());
    }
}
