//! # livescribe-core
//!
//! Streaming speech-to-text session SDK.
//!
//! ## Architecture
//!
//! ```text
//! CaptureBackend → CaptureHandle::run (capture thread)
//!                        │
//!              Recognizer::accept_waveform
//!                        │
//!          partial_result / final_result → RecognitionEvent
//!                        │
//!       crossbeam queue → delivery thread → EventSink (current subscriber)
//! ```
//!
//! `RecognitionSession` owns the engine, the capture thread and the delivery
//! thread, and serialises `init` / `start` / `stop` / `dispose`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod config;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod session;

// Convenience re-exports for downstream crates
pub use audio::{CaptureBackend, CaptureFormat, PcmFeed, PcmFeedWriter, WavFileBackend};
pub use config::SessionConfig;
pub use error::{LivescribeError, Result};
pub use inference::{stub::StubEngine, Recognizer, SpeechEngine, SpeechModel};
pub use ipc::commands::{dispatch, Command, CommandResponse};
pub use ipc::events::{ErrorKind, ErrorPayload, RecognitionEvent, SessionEvent, SessionStatus};
pub use session::{DiagnosticsSnapshot, EventSink, RecognitionSession};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;
