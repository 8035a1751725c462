//! The blocking read → frame loop.
//!
//! ## Per iteration
//!
//! ```text
//! 0. cancelled?            → exit(Cancelled)
//! 1. read_frame(buffer)
//!    Ok(0)                 → sleep empty_read_sleep_ms, retry
//!    Ok(n)                 → on_frame(AudioFrame { seq, &buffer[..n] })
//!    Err(e)                → log, back off, retry; after N in a row → exit(DeviceFailed)
//! ```
//!
//! Cancellation is cooperative: an in-flight read always completes, so the
//! stop latency is bounded by one read (plus one sleep).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{CaptureBackend, CaptureFormat, PcmStream};
use crate::config::SessionConfig;
use crate::error::{LivescribeError, Result};

/// Shared stop flag handed to the capture thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One captured frame. Borrows the loop's buffer, so it cannot outlive the
/// processing step it was handed to.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    /// Capture-order sequence number, starting at the `first_seq` given to `run`.
    pub seq: u64,
    /// Valid PCM bytes (`0 < len <= capacity`).
    pub bytes: &'a [u8],
}

/// Why `CaptureHandle::run` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    /// Reads kept failing; carries the last device error.
    DeviceFailed(String),
}

/// Tallies reported back by the loop, for diagnostics.
pub trait CaptureObserver {
    fn on_empty_read(&self) {}
    fn on_read_error(&self) {}
}

impl CaptureObserver for () {}

/// An open capture stream plus its read buffer.
pub struct CaptureHandle {
    stream: Box<dyn PcmStream>,
    buffer: Vec<u8>,
    cancel: CancelToken,
    empty_read_sleep: Duration,
    error_backoff: Duration,
    max_consecutive_errors: u32,
    closed: bool,
}

impl CaptureHandle {
    /// Validate `format` against the backend and open a stream.
    ///
    /// The buffer is the device minimum, floored at `config.min_buffer_bytes`.
    ///
    /// # Errors
    /// `AudioUnavailable` when the backend rejects the format or the device
    /// cannot be opened.
    pub fn open(
        backend: &dyn CaptureBackend,
        format: CaptureFormat,
        config: &SessionConfig,
        cancel: CancelToken,
    ) -> Result<Self> {
        if format.sample_rate == 0 || format.bytes_per_sample() == 0 {
            return Err(LivescribeError::AudioUnavailable(format!(
                "invalid capture format: {format:?}"
            )));
        }

        let device_min = backend.min_buffer_size(&format).map_err(into_unavailable)?;
        let buffer_size = device_min.max(config.min_buffer_bytes);

        let stream = backend
            .open(&format, buffer_size)
            .map_err(into_unavailable)?;

        info!(
            backend = backend.name(),
            sample_rate = format.sample_rate,
            device_min,
            buffer_size,
            "capture stream opened"
        );

        Ok(Self {
            stream,
            buffer: vec![0u8; buffer_size],
            cancel,
            empty_read_sleep: Duration::from_millis(config.empty_read_sleep_ms),
            error_backoff: Duration::from_millis(config.read_error_backoff_ms),
            max_consecutive_errors: config.max_consecutive_read_errors.max(1),
            closed: false,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Request termination; observed at the top of the next iteration.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run until cancelled or the device fails persistently.
    ///
    /// `first_seq` numbers the first delivered frame. Sequence numbers only
    /// advance for delivered frames.
    pub fn run(
        &mut self,
        first_seq: u64,
        observer: &dyn CaptureObserver,
        mut on_frame: impl FnMut(AudioFrame<'_>),
    ) -> LoopExit {
        let mut seq = first_seq;
        let mut consecutive_errors = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                debug!(next_seq = seq, "capture loop cancelled");
                return LoopExit::Cancelled;
            }

            match self.stream.read_frame(&mut self.buffer) {
                Ok(0) => {
                    observer.on_empty_read();
                    std::thread::sleep(self.empty_read_sleep);
                }
                Ok(n) if n > self.buffer.len() => {
                    observer.on_read_error();
                    consecutive_errors += 1;
                    warn!(
                        read = n,
                        capacity = self.buffer.len(),
                        "stream reported more bytes than the buffer holds, discarding"
                    );
                    if consecutive_errors >= self.max_consecutive_errors {
                        return LoopExit::DeviceFailed(format!(
                            "stream overran its buffer ({n} > {})",
                            self.buffer.len()
                        ));
                    }
                }
                Ok(n) => {
                    consecutive_errors = 0;
                    on_frame(AudioFrame {
                        seq,
                        bytes: &self.buffer[..n],
                    });
                    seq += 1;
                }
                Err(e) => {
                    observer.on_read_error();
                    consecutive_errors += 1;
                    warn!(
                        error = %e,
                        consecutive_errors,
                        limit = self.max_consecutive_errors,
                        "capture read failed, retrying"
                    );
                    if consecutive_errors >= self.max_consecutive_errors {
                        return LoopExit::DeviceFailed(e.to_string());
                    }
                    std::thread::sleep(self.error_backoff);
                }
            }
        }
    }

    /// Stop the device and release it. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stream.stop_and_release();
        debug!("capture stream released");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn into_unavailable(err: LivescribeError) -> LivescribeError {
    match err {
        LivescribeError::AudioUnavailable(_) => err,
        other => LivescribeError::AudioUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    enum Step {
        Data(Vec<u8>),
        Empty,
        Fail,
        Overrun,
    }

    struct ScriptStream {
        steps: VecDeque<Step>,
        cancel_when_drained: CancelToken,
        releases: Rc<Cell<usize>>,
    }

    impl PcmStream for ScriptStream {
        fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Step::Empty) => Ok(0),
                Some(Step::Fail) => Err(LivescribeError::CaptureRead("glitch".into())),
                Some(Step::Overrun) => Ok(buf.len() + 1),
                None => {
                    self.cancel_when_drained.cancel();
                    Ok(0)
                }
            }
        }

        fn stop_and_release(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    struct FixedBackend {
        min: Result<usize>,
    }

    impl CaptureBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        fn min_buffer_size(&self, _format: &CaptureFormat) -> Result<usize> {
            match &self.min {
                Ok(n) => Ok(*n),
                Err(e) => Err(LivescribeError::Engine(e.to_string())),
            }
        }

        fn open(&self, _format: &CaptureFormat, _buffer_size: usize) -> Result<Box<dyn PcmStream>> {
            Err(LivescribeError::AudioUnavailable("not used".into()))
        }
    }

    #[derive(Default)]
    struct Counts {
        empty: Cell<usize>,
        errors: Cell<usize>,
    }

    impl CaptureObserver for Counts {
        fn on_empty_read(&self) {
            self.empty.set(self.empty.get() + 1);
        }

        fn on_read_error(&self) {
            self.errors.set(self.errors.get() + 1);
        }
    }

    fn handle(steps: Vec<Step>, max_errors: u32) -> (CaptureHandle, Rc<Cell<usize>>) {
        let cancel = CancelToken::new();
        let releases = Rc::new(Cell::new(0));
        let stream = ScriptStream {
            steps: steps.into(),
            cancel_when_drained: cancel.clone(),
            releases: Rc::clone(&releases),
        };
        let handle = CaptureHandle {
            stream: Box::new(stream),
            buffer: vec![0u8; 4096],
            cancel,
            empty_read_sleep: Duration::from_millis(1),
            error_backoff: Duration::from_millis(1),
            max_consecutive_errors: max_errors,
            closed: false,
        };
        (handle, releases)
    }

    #[test]
    fn empty_reads_and_transient_errors_are_never_forwarded() {
        let (mut h, _) = handle(
            vec![
                Step::Data(vec![1; 320]),
                Step::Empty,
                Step::Fail,
                Step::Data(vec![2; 160]),
                Step::Empty,
                Step::Data(vec![3; 10]),
            ],
            5,
        );
        let counts = Counts::default();
        let mut frames = Vec::new();

        let exit = h.run(7, &counts, |frame| frames.push((frame.seq, frame.bytes.to_vec())));

        assert_eq!(exit, LoopExit::Cancelled);
        assert_eq!(
            frames.iter().map(|(seq, b)| (*seq, b.len(), b[0])).collect::<Vec<_>>(),
            vec![(7, 320, 1), (8, 160, 2), (9, 10, 3)]
        );
        assert_eq!(counts.errors.get(), 1);
        assert!(counts.empty.get() >= 2);
    }

    #[test]
    fn persistent_errors_end_the_loop_with_device_failed() {
        let (mut h, _) = handle(vec![Step::Fail, Step::Fail, Step::Fail, Step::Data(vec![1])], 3);
        let mut frames = 0;

        let exit = h.run(0, &(), |_| frames += 1);

        assert!(matches!(exit, LoopExit::DeviceFailed(ref msg) if msg.contains("glitch")));
        assert_eq!(frames, 0);
    }

    #[test]
    fn successful_read_resets_error_streak() {
        let (mut h, _) = handle(
            vec![
                Step::Fail,
                Step::Fail,
                Step::Data(vec![1; 4]),
                Step::Fail,
                Step::Fail,
                Step::Data(vec![2; 4]),
            ],
            3,
        );
        let mut frames = 0;
        assert_eq!(h.run(0, &(), |_| frames += 1), LoopExit::Cancelled);
        assert_eq!(frames, 2);
    }

    #[test]
    fn overrun_reads_are_discarded() {
        let (mut h, _) = handle(vec![Step::Overrun, Step::Data(vec![9; 8])], 3);
        let mut seen = Vec::new();
        assert_eq!(h.run(0, &(), |f| seen.push(f.bytes.len())), LoopExit::Cancelled);
        assert_eq!(seen, vec![8]);
    }

    #[test]
    fn cancelled_before_first_read_delivers_nothing() {
        let (mut h, _) = handle(vec![Step::Data(vec![1; 4])], 3);
        h.cancel();
        let mut frames = 0;
        assert_eq!(h.run(0, &(), |_| frames += 1), LoopExit::Cancelled);
        assert_eq!(frames, 0);
    }

    #[test]
    fn close_is_idempotent_and_runs_on_drop() {
        let (mut h, releases) = handle(vec![], 3);
        h.close();
        h.close();
        drop(h);
        assert_eq!(releases.get(), 1);

        let (h, releases) = handle(vec![], 3);
        drop(h);
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn open_maps_backend_failures_to_audio_unavailable() {
        let backend = FixedBackend {
            min: Err(LivescribeError::Engine("bad value".into())),
        };
        let err = CaptureHandle::open(
            &backend,
            CaptureFormat::mono16(16_000),
            &SessionConfig::default(),
            CancelToken::new(),
        )
        .err()
        .expect("open should fail");
        assert!(matches!(err, LivescribeError::AudioUnavailable(_)));
    }

    #[test]
    fn open_rejects_zero_sample_rate() {
        let backend = FixedBackend { min: Ok(256) };
        let err = CaptureHandle::open(
            &backend,
            CaptureFormat::mono16(0),
            &SessionConfig::default(),
            CancelToken::new(),
        )
        .err()
        .expect("open should fail");
        assert!(matches!(err, LivescribeError::AudioUnavailable(_)));
    }
}
