use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::audio::capture::CaptureObserver;

/// Counters shared by the command, capture and delivery threads.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_read: AtomicUsize,
    pub empty_reads: AtomicUsize,
    pub read_errors: AtomicUsize,
    pub engine_errors: AtomicUsize,
    pub partial_events: AtomicUsize,
    pub final_events: AtomicUsize,
    pub events_delivered: AtomicUsize,
    /// Events produced while no subscriber was registered.
    pub events_dropped: AtomicUsize,
    pub loops_started: AtomicUsize,
    /// Capture threads currently alive. Never exceeds 1.
    pub loops_alive: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            empty_reads: self.empty_reads.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            engine_errors: self.engine_errors.load(Ordering::Relaxed),
            partial_events: self.partial_events.load(Ordering::Relaxed),
            final_events: self.final_events.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            loops_started: self.loops_started.load(Ordering::SeqCst),
            loops_alive: self.loops_alive.load(Ordering::SeqCst),
        }
    }
}

impl CaptureObserver for SessionDiagnostics {
    fn on_empty_read(&self) {
        self.empty_reads.fetch_add(1, Ordering::Relaxed);
    }

    fn on_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Marks a capture thread alive for as long as it is held.
pub(crate) struct LoopGuard<'a>(&'a SessionDiagnostics);

impl<'a> LoopGuard<'a> {
    pub(crate) fn enter(diagnostics: &'a SessionDiagnostics) -> Self {
        diagnostics.loops_started.fetch_add(1, Ordering::SeqCst);
        diagnostics.loops_alive.fetch_add(1, Ordering::SeqCst);
        Self(diagnostics)
    }
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.0.loops_alive.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_read: usize,
    pub empty_reads: usize,
    pub read_errors: usize,
    pub engine_errors: usize,
    pub partial_events: usize,
    pub final_events: usize,
    pub events_delivered: usize,
    pub events_dropped: usize,
    pub loops_started: usize,
    pub loops_alive: usize,
}
