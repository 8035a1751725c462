//! Capture/recognition thread.
//!
//! ## Per frame
//!
//! ```text
//! 1. recognizer.accept_waveform(frame)
//!    Ok(true)   → final_result()   → RecognitionEvent { isFinal: true }
//!    Ok(false)  → partial_result() → RecognitionEvent { isFinal: false }
//!    Err(e)     → log, count, next frame
//! 2. Empty payload ({} / null / "") → no event
//! 3. Queue the event for the delivery thread
//! ```
//!
//! The recognizer is moved into the thread for the whole recording and comes
//! back through `JoinHandle::join`, so the per-frame path takes no lock.
//! Device open happens inside the thread; the outcome is reported back to
//! `spawn` over a oneshot before it returns.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn};

use super::delivery::Delivery;
use super::diagnostics::{LoopGuard, SessionDiagnostics};
use crate::audio::{AudioFrame, CancelToken, CaptureBackend, CaptureFormat, CaptureHandle, LoopExit};
use crate::config::SessionConfig;
use crate::error::{LivescribeError, Result};
use crate::inference::Recognizer;
use crate::ipc::events::{ErrorPayload, RecognitionEvent};

/// Everything the capture thread needs besides the recognizer.
pub(crate) struct WorkerContext {
    pub backend: Arc<dyn CaptureBackend>,
    pub format: CaptureFormat,
    pub config: SessionConfig,
    pub events: Sender<Delivery>,
    pub diagnostics: Arc<SessionDiagnostics>,
    /// Next frame sequence number; survives restarts.
    pub next_seq: Arc<AtomicU64>,
}

/// Why `CaptureWorker::spawn` failed. Carries the recognizer back when the
/// thread got far enough to return it.
pub(crate) struct StartFailure {
    pub recognizer: Option<Box<dyn Recognizer>>,
    pub error: LivescribeError,
}

/// A running capture thread.
pub(crate) struct CaptureWorker {
    cancel: CancelToken,
    /// Set by the thread once its loop has returned, for any reason.
    exited: Arc<AtomicBool>,
    thread: Option<JoinHandle<Box<dyn Recognizer>>>,
}

impl CaptureWorker {
    /// Spawn the capture thread and wait until the device is open.
    pub(crate) fn spawn(
        ctx: WorkerContext,
        recognizer: Box<dyn Recognizer>,
    ) -> std::result::Result<Self, StartFailure> {
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();
        let exited = Arc::new(AtomicBool::new(false));
        let thread_exited = Arc::clone(&exited);
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();

        let spawned = thread::Builder::new()
            .name("livescribe-capture".into())
            .spawn(move || run(ctx, recognizer, thread_cancel, thread_exited, open_tx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return Err(StartFailure {
                    recognizer: None,
                    error: LivescribeError::Io(e),
                })
            }
        };

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                cancel,
                exited,
                thread: Some(handle),
            }),
            Ok(Err(error)) => Err(StartFailure {
                recognizer: handle.join().ok(),
                error,
            }),
            Err(_) => Err(StartFailure {
                recognizer: handle.join().ok(),
                error: LivescribeError::Other(anyhow::anyhow!(
                    "capture thread exited before opening the device"
                )),
            }),
        }
    }

    /// Whether the capture loop has ended on its own, e.g. after a persistent
    /// device failure.
    pub(crate) fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
            || self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the loop and join the thread. Returns the recognizer unless
    /// the thread panicked.
    pub(crate) fn stop(mut self) -> Option<Box<dyn Recognizer>> {
        self.cancel.cancel();
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(recognizer) => Some(recognizer),
            Err(_) => {
                error!("capture thread panicked; recognizer lost");
                None
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    ctx: WorkerContext,
    mut recognizer: Box<dyn Recognizer>,
    cancel: CancelToken,
    exited: Arc<AtomicBool>,
    open_tx: mpsc::Sender<Result<()>>,
) -> Box<dyn Recognizer> {
    let _span = info_span!("capture", backend = ctx.backend.name()).entered();
    let _alive = LoopGuard::enter(&ctx.diagnostics);

    let mut capture = match CaptureHandle::open(&*ctx.backend, ctx.format, &ctx.config, cancel) {
        Ok(capture) => capture,
        Err(e) => {
            warn!(error = %e, "capture open failed");
            let _ = open_tx.send(Err(e));
            return recognizer;
        }
    };
    let _ = open_tx.send(Ok(()));
    drop(open_tx);

    let first_seq = ctx.next_seq.load(Ordering::SeqCst);
    let mut next_seq = first_seq;
    info!(first_seq, buffer = capture.buffer_size(), "capture loop started");

    let exit = capture.run(first_seq, &*ctx.diagnostics, |frame| {
        next_seq = frame.seq + 1;
        ctx.diagnostics.frames_read.fetch_add(1, Ordering::Relaxed);
        if let Some(event) = recognize_frame(&mut *recognizer, frame, &ctx.diagnostics) {
            let _ = ctx.events.send(Delivery::Event(event));
        }
    });

    ctx.next_seq.store(next_seq, Ordering::SeqCst);
    capture.close();

    if let LoopExit::DeviceFailed(message) = exit {
        error!(%message, "capture device failed persistently; loop exited");
        let failure = LivescribeError::CaptureFailed(message);
        let _ = ctx.events.send(Delivery::Error(ErrorPayload::from(&failure)));
    }
    exited.store(true, Ordering::SeqCst);
    info!(next_seq, "capture loop exited");
    recognizer
}

/// Run one frame through the recognizer.
pub(crate) fn recognize_frame(
    recognizer: &mut dyn Recognizer,
    frame: AudioFrame<'_>,
    diagnostics: &SessionDiagnostics,
) -> Option<RecognitionEvent> {
    let is_final = match recognizer.accept_waveform(frame.bytes) {
        Ok(is_final) => is_final,
        Err(e) => {
            diagnostics.engine_errors.fetch_add(1, Ordering::Relaxed);
            warn!(seq = frame.seq, error = %e, "recognizer rejected frame");
            return None;
        }
    };

    let payload = if is_final {
        recognizer.final_result()
    } else {
        recognizer.partial_result()
    };
    if is_empty_payload(&payload) {
        debug!(seq = frame.seq, "empty engine result; no event");
        return None;
    }

    if is_final {
        diagnostics.final_events.fetch_add(1, Ordering::Relaxed);
    } else {
        diagnostics.partial_events.fetch_add(1, Ordering::Relaxed);
    }
    Some(RecognitionEvent::from_payload(frame.seq, is_final, payload))
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
