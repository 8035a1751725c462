//! Push-fed capture source.
//!
//! For hosts that own the microphone themselves (mobile audio APIs, network
//! streams): the host keeps a [`PcmFeedWriter`] and pushes PCM chunks; the
//! session's capture loop reads them through [`PcmFeed`]. Each read yields at
//! most one pushed chunk, so chunk boundaries survive into frames.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::debug;

use super::{CaptureBackend, CaptureFormat, PcmStream};
use crate::error::{LivescribeError, Result};

enum FeedItem {
    Pcm(Vec<u8>),
    Fault(String),
}

#[derive(Debug, Default)]
struct FeedShared {
    unavailable: AtomicBool,
    opens: AtomicUsize,
    releases: AtomicUsize,
}

/// Capture backend reading from an in-process queue.
pub struct PcmFeed {
    rx: Receiver<FeedItem>,
    min_buffer: usize,
    shared: Arc<FeedShared>,
}

/// Producer half of a [`PcmFeed`]. Cheap to clone.
#[derive(Clone)]
pub struct PcmFeedWriter {
    tx: Sender<FeedItem>,
    shared: Arc<FeedShared>,
}

impl PcmFeed {
    /// Create a feed whose reported device minimum is `min_buffer` bytes.
    pub fn new(min_buffer: usize) -> (Self, PcmFeedWriter) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(FeedShared::default());
        (
            Self {
                rx,
                min_buffer,
                shared: Arc::clone(&shared),
            },
            PcmFeedWriter { tx, shared },
        )
    }
}

impl PcmFeedWriter {
    /// Queue one chunk. Empty chunks are ignored.
    pub fn push(&self, pcm: impl Into<Vec<u8>>) {
        let pcm = pcm.into();
        if !pcm.is_empty() {
            let _ = self.tx.send(FeedItem::Pcm(pcm));
        }
    }

    /// Queue a device error; the next read after the queued chunks fails.
    pub fn fault(&self, message: impl Into<String>) {
        let _ = self.tx.send(FeedItem::Fault(message.into()));
    }

    /// While `false`, opening the feed fails with `AudioUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.shared.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Streams opened so far.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Streams released so far.
    pub fn releases(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }

    /// Chunks queued but not yet read.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl CaptureBackend for PcmFeed {
    fn name(&self) -> &str {
        "pcm-feed"
    }

    fn min_buffer_size(&self, format: &CaptureFormat) -> Result<usize> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(LivescribeError::AudioUnavailable("feed is unavailable".into()));
        }
        if !format.is_mono16() {
            return Err(LivescribeError::AudioUnavailable(format!(
                "feed only carries mono 16-bit PCM, got {format:?}"
            )));
        }
        Ok(self.min_buffer)
    }

    fn open(&self, _format: &CaptureFormat, _buffer_size: usize) -> Result<Box<dyn PcmStream>> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(LivescribeError::AudioUnavailable("feed is unavailable".into()));
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FeedStream {
            rx: self.rx.clone(),
            carry: Vec::new(),
            shared: Arc::clone(&self.shared),
            released: false,
        }))
    }
}

struct FeedStream {
    rx: Receiver<FeedItem>,
    /// Tail of a chunk larger than the read buffer.
    carry: Vec<u8>,
    shared: Arc<FeedShared>,
    released: bool,
}

impl FeedStream {
    fn emit(&mut self, mut chunk: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.carry = chunk.split_off(n);
        n
    }
}

impl PcmStream for FeedStream {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.released {
            return Ok(0);
        }
        if !self.carry.is_empty() {
            let chunk = std::mem::take(&mut self.carry);
            return Ok(self.emit(chunk, buf));
        }
        match self.rx.try_recv() {
            Ok(FeedItem::Pcm(chunk)) => Ok(self.emit(chunk, buf)),
            Ok(FeedItem::Fault(message)) => Err(LivescribeError::CaptureRead(message)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(0),
        }
    }

    fn stop_and_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
        debug!(carry = self.carry.len(), "pcm feed stream released");
    }
}
