//! Channel-backed subscribers.
//!
//! Wrap a sender in an `Arc`, hand it to `RecognitionSession::subscribe`,
//! and keep the `Arc` alive for as long as events should flow.

use tokio::sync::broadcast;
use tracing::trace;

use super::events::{ErrorPayload, RecognitionEvent, SessionEvent};
use crate::session::EventSink;

impl EventSink for crossbeam_channel::Sender<SessionEvent> {
    fn on_event(&self, event: &RecognitionEvent) {
        if self.send(SessionEvent::Recognition(event.clone())).is_err() {
            trace!(seq = event.seq, "event receiver gone");
        }
    }

    fn on_error(&self, error: &ErrorPayload) {
        let _ = self.send(SessionEvent::Error(error.clone()));
    }
}

impl EventSink for broadcast::Sender<SessionEvent> {
    fn on_event(&self, event: &RecognitionEvent) {
        // Err only means nobody is listening right now.
        if self.send(SessionEvent::Recognition(event.clone())).is_err() {
            trace!(seq = event.seq, "no broadcast receivers");
        }
    }

    fn on_error(&self, error: &ErrorPayload) {
        let _ = self.send(SessionEvent::Error(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::ipc::events::ErrorKind;

    #[test]
    fn crossbeam_sink_wraps_events() {
        let (tx, rx) = crossbeam_channel::unbounded::<SessionEvent>();
        let event = RecognitionEvent::from_payload(4, true, json!({ "text": "hi" }));
        tx.on_event(&event);
        tx.on_error(&ErrorPayload {
            kind: ErrorKind::CaptureFailed,
            message: "unplugged".into(),
        });

        assert_eq!(rx.try_recv().expect("event"), SessionEvent::Recognition(event));
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Error(_))));
    }

    #[test]
    fn broadcast_sink_tolerates_no_receivers() {
        let (tx, rx) = broadcast::channel::<SessionEvent>(4);
        drop(rx);
        tx.on_event(&RecognitionEvent::from_payload(0, false, json!({ "partial": "h" })));

        let mut rx = tx.subscribe();
        tx.on_event(&RecognitionEvent::from_payload(1, false, json!({ "partial": "he" })));
        match rx.try_recv().expect("event") {
            SessionEvent::Recognition(event) => assert_eq!(event.text, "he"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
