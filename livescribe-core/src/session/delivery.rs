//! Delivery context: hands events to the current subscriber on a thread of
//! its own, so recognition latency never blocks the consumer and vice versa.
//!
//! ```text
//! capture thread ──Delivery::Event──► unbounded queue ──► delivery thread ──► EventSink
//! ```
//!
//! The subscriber slot is locked for the duration of each hand-off. Replacing
//! the subscriber from another thread therefore waits for an in-flight
//! delivery, and once `replace` returns the old sink receives nothing more.
//! The lock is reentrant, so a sink may unsubscribe, resubscribe or drive the
//! session from inside `on_event`.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{atomic::Ordering, Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::ReentrantMutex;
use tracing::{debug, error, trace};

use super::diagnostics::SessionDiagnostics;
use crate::error::Result;
use crate::ipc::events::{ErrorPayload, RecognitionEvent};

/// Consumer of session output.
pub trait EventSink: Send + Sync {
    /// A recognition result, in capture order.
    fn on_event(&self, event: &RecognitionEvent);

    /// A runtime failure of the capture context (e.g. the device died).
    fn on_error(&self, _error: &ErrorPayload) {}
}

pub(crate) enum Delivery {
    Event(RecognitionEvent),
    Error(ErrorPayload),
    /// Acknowledged once everything queued before it has been handed off.
    Flush(Sender<()>),
}

/// At most one subscriber, held weakly.
///
/// The `RefCell` is only ever borrowed briefly, never across a sink call, so
/// the delivery thread can re-enter `replace` from a sink.
pub(crate) struct SubscriberSlot(ReentrantMutex<RefCell<Option<Weak<dyn EventSink>>>>);

impl Default for SubscriberSlot {
    fn default() -> Self {
        Self(ReentrantMutex::new(RefCell::new(None)))
    }
}

impl SubscriberSlot {
    pub(crate) fn replace(&self, sink: Option<Weak<dyn EventSink>>) {
        let guard = self.0.lock();
        *guard.borrow_mut() = sink;
    }

    pub(crate) fn is_set(&self) -> bool {
        let guard = self.0.lock();
        let set = guard
            .borrow()
            .as_ref()
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false);
        set
    }

    /// Run `f` against the live subscriber, holding the slot lock throughout.
    fn with_current(&self, f: impl FnOnce(&dyn EventSink)) -> bool {
        let guard = self.0.lock();
        let current = guard.borrow().as_ref().and_then(Weak::upgrade);
        let Some(sink) = current else {
            return false;
        };
        if catch_unwind(AssertUnwindSafe(|| f(&*sink))).is_err() {
            error!("event subscriber panicked; continuing delivery");
        }
        true
    }
}

pub(crate) struct DeliveryContext {
    tx: Sender<Delivery>,
    thread: Option<JoinHandle<()>>,
}

impl DeliveryContext {
    pub(crate) fn spawn(
        slot: Arc<SubscriberSlot>,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name("livescribe-delivery".into())
            .spawn(move || run(rx, &slot, &diagnostics))?;
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub(crate) fn sender(&self) -> Sender<Delivery> {
        self.tx.clone()
    }

    fn on_delivery_thread(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| t.thread().id() == thread::current().id())
            .unwrap_or(false)
    }

    /// A handle that can wait for the queue after the caller drops its locks.
    pub(crate) fn flusher(&self) -> Flusher {
        Flusher {
            tx: self.tx.clone(),
            delivery_thread: self.thread.as_ref().map(|t| t.thread().id()),
        }
    }

    /// Block until every event queued so far has been handed off.
    #[cfg(test)]
    pub(crate) fn flush(&self) {
        self.flusher().wait();
    }

    /// Drain the queue and join the delivery thread.
    ///
    /// Only returns once no sender other than this one is alive, i.e. after
    /// the capture thread has been joined.
    pub(crate) fn shutdown(mut self) {
        let on_self = self.on_delivery_thread();
        let thread = self.thread.take();
        drop(self);
        match thread {
            Some(handle) if !on_self => {
                if handle.join().is_err() {
                    error!("delivery thread panicked");
                }
            }
            _ => {}
        }
        debug!("delivery context shut down");
    }
}

/// Waits for everything queued before `wait` to be handed off.
///
/// A no-op on the delivery thread itself, where waiting would never finish.
pub(crate) struct Flusher {
    tx: Sender<Delivery>,
    delivery_thread: Option<ThreadId>,
}

impl Flusher {
    pub(crate) fn wait(self) {
        if self.delivery_thread == Some(thread::current().id()) {
            return;
        }
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.tx.send(Delivery::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

fn run(rx: Receiver<Delivery>, slot: &SubscriberSlot, diagnostics: &SessionDiagnostics) {
    for message in rx.iter() {
        match message {
            Delivery::Event(event) => {
                if slot.with_current(|sink| sink.on_event(&event)) {
                    diagnostics.events_delivered.fetch_add(1, Ordering::Relaxed);
                } else {
                    diagnostics.events_dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(seq = event.seq, "no subscriber; event dropped");
                }
            }
            Delivery::Error(payload) => {
                if !slot.with_current(|sink| sink.on_error(&payload)) {
                    debug!(message = %payload.message, "no subscriber for error event");
                }
            }
            Delivery::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
