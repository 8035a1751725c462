//! `RecognitionSession`: engine lifecycle plus the capture and delivery
//! threads.
//!
//! ## Lifecycle
//!
//! ```text
//! new()  → Uninitialized
//!   init(path, rate) → Ready          (load model + recognizer; replaces any previous engine)
//!   start()          → Recording      (spawn capture thread; no-op if already recording)
//!   stop()           → Ready          (cancel + join capture thread, flush delivery)
//!   dispose()        → Disposed       (stop, release engine, drop subscriber, join delivery)
//! ```
//!
//! One mutex serialises every command. The capture thread never touches it:
//! it owns the recognizer while recording and hands it back on join. Waiting
//! on the delivery thread (flush, join) happens after that mutex is released,
//! so a subscriber may call any command from inside its callback.
//!
//! Engine handles live in exactly one place at a time (`State::Ready`, the
//! capture thread, or `Recording::model`), so each is dropped exactly once.

pub mod delivery;
pub mod diagnostics;
mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::{atomic::AtomicU64, Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::{CaptureBackend, CaptureFormat};
use crate::config::SessionConfig;
use crate::error::{LivescribeError, Result};
use crate::inference::{EngineHandle, Recognizer, SpeechEngine, SpeechModel};
use crate::ipc::events::SessionStatus;

pub use delivery::EventSink;
pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

use delivery::{DeliveryContext, SubscriberSlot};
use pipeline::{CaptureWorker, StartFailure, WorkerContext};

enum State {
    Uninitialized,
    Ready(EngineHandle),
    Recording(Recording),
    Disposed,
}

impl State {
    fn status(&self) -> SessionStatus {
        match self {
            Self::Uninitialized => SessionStatus::Uninitialized,
            Self::Ready(_) => SessionStatus::Ready,
            Self::Recording(_) => SessionStatus::Recording,
            Self::Disposed => SessionStatus::Disposed,
        }
    }
}

/// Engine parts while the recognizer is out on the capture thread.
///
/// `worker` is declared first so an implicit drop joins the thread (and
/// releases the recognizer) before the model goes.
struct Recording {
    worker: CaptureWorker,
    model: Box<dyn SpeechModel>,
    model_path: PathBuf,
    sample_rate: u32,
}

struct SessionInner {
    state: State,
    /// `None` once disposed.
    delivery: Option<DeliveryContext>,
}

/// A streaming speech-to-text session.
///
/// All methods take `&self`; share it behind an `Arc` between the command
/// context and whoever owns the subscriber.
pub struct RecognitionSession {
    engine: Arc<dyn SpeechEngine>,
    backend: Arc<dyn CaptureBackend>,
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    subscriber: Arc<SubscriberSlot>,
    diagnostics: Arc<SessionDiagnostics>,
    next_seq: Arc<AtomicU64>,
}

impl RecognitionSession {
    /// Create an uninitialised session and its delivery thread.
    ///
    /// # Errors
    /// `Io` if the delivery thread cannot be spawned.
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        backend: Arc<dyn CaptureBackend>,
        config: SessionConfig,
    ) -> Result<Self> {
        let subscriber = Arc::new(SubscriberSlot::default());
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let delivery = DeliveryContext::spawn(Arc::clone(&subscriber), Arc::clone(&diagnostics))?;
        debug!(backend = backend.name(), ?config, "recognition session created");

        Ok(Self {
            engine,
            backend,
            config,
            inner: Mutex::new(SessionInner {
                state: State::Uninitialized,
                delivery: Some(delivery),
            }),
            subscriber,
            diagnostics,
            next_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Load `model_path` and build a recognizer for `sample_rate`.
    ///
    /// The new engine is loaded before anything is torn down: on failure the
    /// session keeps its previous engine and state. On success a running
    /// recording is stopped and the previous engine released.
    ///
    /// # Errors
    /// - `EngineInit` if the model or recognizer cannot be created.
    /// - `Disposed` after `dispose`.
    pub fn init(&self, model_path: impl AsRef<Path>, sample_rate: u32) -> Result<()> {
        let model_path = model_path.as_ref();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut flusher = None;

        if matches!(inner.state, State::Disposed) {
            return Err(LivescribeError::Disposed);
        }
        if sample_rate == 0 {
            return Err(LivescribeError::EngineInit(
                "sample rate must be positive".into(),
            ));
        }

        info!(path = %model_path.display(), sample_rate, "loading recognition model");
        let handle = EngineHandle::load(&*self.engine, model_path, sample_rate).map_err(|e| {
            warn!(error = %e, path = %model_path.display(), "engine init failed");
            match e {
                LivescribeError::EngineInit(_) => e,
                other => LivescribeError::EngineInit(other.to_string()),
            }
        })?;

        match std::mem::replace(&mut inner.state, State::Ready(handle)) {
            State::Recording(recording) => {
                info!("re-init while recording; stopping capture first");
                release(recording);
                flusher = inner.delivery.as_ref().map(DeliveryContext::flusher);
            }
            State::Ready(previous) => {
                debug!(path = %previous.model_path().display(), "releasing previous engine");
                drop(previous);
            }
            State::Uninitialized | State::Disposed => {}
        }
        drop(guard);

        if let Some(flusher) = flusher {
            flusher.wait();
        }
        info!(path = %model_path.display(), sample_rate, "session ready");
        Ok(())
    }

    /// Open the capture device and start recognising on a capture thread.
    ///
    /// Returns once the device is open. A second call while recording is a
    /// no-op, unless the capture loop has already ended on a device failure:
    /// then the dead loop is reaped and a fresh one opened.
    ///
    /// # Errors
    /// - `NotReady` before `init` (state stays `Uninitialized`).
    /// - `AudioUnavailable` if the device cannot be opened (state stays `Ready`).
    /// - `Disposed` after `dispose`.
    pub fn start(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let handle = match std::mem::replace(&mut inner.state, State::Uninitialized) {
            State::Ready(handle) => handle,
            State::Recording(recording) if recording.worker.has_exited() => {
                warn!("capture loop had exited; reopening the device");
                match halt(recording) {
                    State::Ready(handle) => handle,
                    other => {
                        inner.state = other;
                        return Err(LivescribeError::NotReady);
                    }
                }
            }
            State::Recording(recording) => {
                inner.state = State::Recording(recording);
                debug!("start ignored: already recording");
                return Ok(());
            }
            State::Uninitialized => return Err(LivescribeError::NotReady),
            State::Disposed => {
                inner.state = State::Disposed;
                return Err(LivescribeError::Disposed);
            }
        };

        let Some(events) = inner.delivery.as_ref().map(DeliveryContext::sender) else {
            inner.state = State::Ready(handle);
            return Err(LivescribeError::Disposed);
        };

        let EngineHandle {
            recognizer,
            model,
            model_path,
            sample_rate,
        } = handle;

        let ctx = WorkerContext {
            backend: Arc::clone(&self.backend),
            format: CaptureFormat::mono16(sample_rate),
            config: self.config.clone(),
            events,
            diagnostics: Arc::clone(&self.diagnostics),
            next_seq: Arc::clone(&self.next_seq),
        };

        match CaptureWorker::spawn(ctx, recognizer) {
            Ok(worker) => {
                info!(sample_rate, backend = self.backend.name(), "recording started");
                inner.state = State::Recording(Recording {
                    worker,
                    model,
                    model_path,
                    sample_rate,
                });
                Ok(())
            }
            Err(StartFailure { recognizer, error }) => {
                warn!(error = %error, "recording failed to start");
                inner.state = reassemble(recognizer, model, model_path, sample_rate);
                Err(error)
            }
        }
    }

    /// Stop recording.
    ///
    /// Returns only after the capture thread has exited, the device has been
    /// released, and every event it produced has been handed to the
    /// subscriber. A no-op unless recording.
    pub fn stop(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let flusher = match std::mem::replace(&mut inner.state, State::Uninitialized) {
            State::Recording(recording) => {
                inner.state = halt(recording);
                inner.delivery.as_ref().map(DeliveryContext::flusher)
            }
            other => {
                debug!(status = ?other.status(), "stop ignored: not recording");
                inner.state = other;
                None
            }
        };
        drop(guard);

        if let Some(flusher) = flusher {
            flusher.wait();
        }
    }

    /// Stop, release the engine, drop the subscriber and join the delivery
    /// thread. Idempotent. No event is delivered once this returns.
    pub fn dispose(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if matches!(inner.state, State::Disposed) {
            debug!("dispose ignored: already disposed");
            return;
        }

        match std::mem::replace(&mut inner.state, State::Disposed) {
            State::Recording(recording) => release(recording),
            State::Ready(handle) => {
                debug!(path = %handle.model_path().display(), "releasing engine");
                drop(handle);
            }
            State::Uninitialized | State::Disposed => {}
        }
        let delivery = inner.delivery.take();
        drop(guard);

        if let Some(delivery) = &delivery {
            delivery.flusher().wait();
        }
        self.subscriber.replace(None);
        if let Some(delivery) = delivery {
            delivery.shutdown();
        }
        info!("session disposed");
    }

    /// Replace the subscriber (`None` clears it).
    ///
    /// Waits for an in-flight delivery to the old subscriber; after this
    /// returns the old subscriber receives nothing more.
    pub fn set_subscriber(&self, sink: Option<Weak<dyn EventSink>>) {
        self.subscriber.replace(sink);
    }

    /// Register `sink` as the subscriber. The session holds it weakly.
    pub fn subscribe<S: EventSink + 'static>(&self, sink: &Arc<S>) {
        let weak = Arc::downgrade(sink) as Weak<dyn EventSink>;
        self.set_subscriber(Some(weak));
    }

    pub fn unsubscribe(&self) {
        self.set_subscriber(None);
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.is_set()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().state.status()
    }

    /// Sample rate fixed by the last successful `init`.
    pub fn sample_rate(&self) -> Option<u32> {
        match &self.inner.lock().state {
            State::Ready(handle) => Some(handle.sample_rate()),
            State::Recording(recording) => Some(recording.sample_rate),
            State::Uninitialized | State::Disposed => None,
        }
    }

    pub fn model_path(&self) -> Option<PathBuf> {
        match &self.inner.lock().state {
            State::Ready(handle) => Some(handle.model_path().to_path_buf()),
            State::Recording(recording) => Some(recording.model_path.clone()),
            State::Uninitialized | State::Disposed => None,
        }
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for RecognitionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionSession")
            .field("backend", &self.backend.name())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Join the capture thread and put the engine back together. The caller
/// flushes delivery once it has released the session lock.
fn halt(recording: Recording) -> State {
    let Recording {
        worker,
        model,
        model_path,
        sample_rate,
    } = recording;

    let recognizer = worker.stop();
    info!("recording stopped");
    reassemble(recognizer, model, model_path, sample_rate)
}

/// Join the capture thread and release the engine without rebuilding it.
fn release(recording: Recording) {
    let Recording {
        worker,
        model,
        model_path,
        ..
    } = recording;

    drop(worker.stop());
    info!("recording stopped");
    debug!(path = %model_path.display(), "releasing engine");
    drop(model);
}

/// Rebuild `Ready` from parts. A recognizer lost to a panicked thread is
/// recreated from the model; if that fails too the engine is released and
/// the session falls back to `Uninitialized`.
fn reassemble(
    recognizer: Option<Box<dyn Recognizer>>,
    model: Box<dyn SpeechModel>,
    model_path: PathBuf,
    sample_rate: u32,
) -> State {
    let recognizer = match recognizer {
        Some(recognizer) => recognizer,
        None => match model.create_recognizer(sample_rate) {
            Ok(recognizer) => {
                warn!("recognizer recreated after capture thread failure");
                recognizer
            }
            Err(e) => {
                error!(error = %e, "could not recreate recognizer; engine released");
                return State::Uninitialized;
            }
        },
    };
    State::Ready(EngineHandle {
        recognizer,
        model,
        model_path,
        sample_rate,
    })
}
