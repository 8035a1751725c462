//! PCM capture capability and the capture loop.
//!
//! # Layers
//!
//! ```text
//! CaptureBackend::open ──► Box<dyn PcmStream> ──► CaptureHandle::run ──► on_frame(AudioFrame)
//!   (microphone / WAV / push feed)                  (capture thread)
//! ```
//!
//! # Threading note
//!
//! `PcmStream` is deliberately **not** `Send`: the microphone backend wraps a
//! `cpal::Stream`, which is bound to its creation thread on Windows/macOS.
//! Streams are therefore opened, read and dropped on the capture thread only.
//! Backends themselves are `Send + Sync` and shared via `Arc`.

pub mod capture;
pub mod feed;
#[cfg(feature = "audio-cpal")]
pub mod microphone;
pub mod resample;
pub mod wav;

pub use capture::{AudioFrame, CancelToken, CaptureHandle, LoopExit};
pub use feed::{PcmFeed, PcmFeedWriter};
#[cfg(feature = "audio-cpal")]
pub use microphone::CpalBackend;
pub use wav::WavFileBackend;

use crate::error::Result;

/// Requested PCM layout. Always interleaved little-endian signed integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl CaptureFormat {
    /// Mono 16-bit PCM at `sample_rate`, the layout recognizers expect.
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_sample() * self.sample_rate as usize
    }

    /// Whether this is the one layout every shipped backend produces.
    pub fn is_mono16(&self) -> bool {
        self.channels == 1 && self.bits_per_sample == 16
    }
}

/// A source of PCM capture streams (microphone, file, host-fed buffer).
pub trait CaptureBackend: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Smallest read buffer the device accepts for `format`.
    ///
    /// # Errors
    /// `AudioUnavailable` if the device is missing or rejects the format.
    fn min_buffer_size(&self, format: &CaptureFormat) -> Result<usize>;

    /// Open and start a stream. Called on the capture thread.
    ///
    /// # Errors
    /// `AudioUnavailable` if the device cannot be opened.
    fn open(&self, format: &CaptureFormat, buffer_size: usize) -> Result<Box<dyn PcmStream>>;
}

/// An open capture stream.
pub trait PcmStream {
    /// Read up to `buf.len()` bytes of PCM.
    ///
    /// `Ok(0)` means "no data yet" and is retried by the loop. `Err` is a
    /// device error; the loop retries it too, but gives up once errors
    /// persist.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Stop the device and release it. Must tolerate repeated calls.
    fn stop_and_release(&mut self);
}

/// Convert f32 samples in [-1.0, 1.0] to little-endian PCM16, appending to `out`.
pub fn encode_pcm16(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono16_sizes() {
        let format = CaptureFormat::mono16(16_000);
        assert!(format.is_mono16());
        assert_eq!(format.bytes_per_sample(), 2);
        assert_eq!(format.bytes_per_second(), 32_000);
    }

    #[test]
    fn encode_pcm16_clamps_and_orders_little_endian() {
        let mut out = Vec::new();
        encode_pcm16(&[0.0, 1.0, -2.0], &mut out);
        assert_eq!(out.len(), 6);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 0);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), -i16::MAX);
    }
}
