//! Microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not block or perform I/O, so it only down-mixes to mono and
//! pushes f32 samples into a lock-free SPSC ring. `read_frame`, on the
//! capture thread, drains the ring, resamples to the requested rate and
//! encodes PCM16.
//!
//! Stream errors reported by cpal (device unplugged, driver reset) are
//! latched and returned from the next `read_frame`, which is what lets the
//! capture loop tell a dead device from a quiet one.

use std::sync::Arc;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize,
};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapRb,
};
use tracing::{error, info, warn};

use super::{encode_pcm16, resample::RateConverter, CaptureBackend, CaptureFormat, PcmStream};
use crate::error::{LivescribeError, Result};

/// Ring capacity in f32 samples: 2^19 ≈ 10.9 s at 48 kHz.
const RING_CAPACITY: usize = 1 << 19;

/// Samples drained from the ring per read.
const DRAIN_CHUNK: usize = 960;

/// Microphone backend. Holds only the device preference; streams are built
/// per `open` on the capture thread.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    preferred_device: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer an input device by exact name, falling back to the default.
    pub fn with_preferred_device(name: impl Into<String>) -> Self {
        Self {
            preferred_device: Some(name.into()),
        }
    }

    fn select_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();

        if let Some(ref preferred) = self.preferred_device {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(device) = devices.find(|d| {
                        d.name().map(|name| &name == preferred).unwrap_or(false)
                    }) {
                        return Ok(device);
                    }
                    warn!(preferred = preferred.as_str(), "preferred input device not found, falling back");
                }
                Err(e) => warn!("failed to list input devices: {e}"),
            }
        }

        host.default_input_device()
            .ok_or_else(|| LivescribeError::AudioUnavailable("no input device found".into()))
    }
}

impl CaptureBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn min_buffer_size(&self, format: &CaptureFormat) -> Result<usize> {
        if !format.is_mono16() {
            return Err(LivescribeError::AudioUnavailable(format!(
                "microphone delivers mono 16-bit PCM only, got {format:?}"
            )));
        }
        let device = self.select_device()?;
        let supported = device
            .default_input_config()
            .map_err(|e| LivescribeError::AudioUnavailable(e.to_string()))?;

        let min_frames = match supported.buffer_size() {
            SupportedBufferSize::Range { min, .. } => *min as usize,
            SupportedBufferSize::Unknown => 0,
        };
        // Device frames are at the device rate; scale to the requested rate.
        let scaled = min_frames * format.sample_rate as usize / supported.sample_rate().0.max(1) as usize;
        Ok(scaled * format.bytes_per_sample())
    }

    fn open(&self, format: &CaptureFormat, _buffer_size: usize) -> Result<Box<dyn PcmStream>> {
        let device = self.select_device()?;
        let unavailable = |e: &dyn std::fmt::Display| LivescribeError::AudioUnavailable(e.to_string());

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device.default_input_config().map_err(|e| unavailable(&e))?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(device_rate, channels, target_rate = format.sample_rate, "microphone config selected");

        let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let fault: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let fault_cb = Arc::clone(&fault);
        let on_error = move |err: cpal::StreamError| {
            error!("audio stream error: {err}");
            *fault_cb.lock() = Some(err.to_string());
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, on_error, |s| s),
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, producer, on_error, |s| s as f32 / 32768.0)
            }
            SampleFormat::U8 => build_stream::<u8>(&device, &config, producer, on_error, |s| {
                (s as f32 - 128.0) / 128.0
            }),
            fmt => {
                return Err(LivescribeError::AudioUnavailable(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| unavailable(&e))?;

        stream.play().map_err(|e| unavailable(&e))?;

        Ok(Box::new(MicrophoneStream {
            stream: Some(stream),
            consumer,
            converter: RateConverter::new(device_rate, format.sample_rate, DRAIN_CHUNK)?,
            fault,
            drained: vec![0f32; DRAIN_CHUNK],
            converted: Vec::with_capacity(DRAIN_CHUNK),
            pending: Vec::new(),
        }))
    }
}

/// Build an input stream that down-mixes `T` samples to mono f32.
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: ringbuf::HeapProd<f32>,
    on_error: impl FnMut(cpal::StreamError) + Send + 'static,
    to_f32: fn(T) -> f32,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let ch = usize::from(config.channels.max(1));
    let mut mix: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            let frames = data.len() / ch;
            mix.resize(frames, 0.0);
            for (f, slot) in mix.iter_mut().enumerate() {
                let base = f * ch;
                let sum: f32 = data[base..base + ch].iter().map(|s| to_f32(*s)).sum();
                *slot = sum / ch as f32;
            }
            let written = producer.push_slice(&mix);
            if written < mix.len() {
                warn!("ring buffer full: dropped {} samples", mix.len() - written);
            }
        },
        on_error,
        None,
    )
}

struct MicrophoneStream {
    /// Dropping the stream releases the device.
    stream: Option<Stream>,
    consumer: HeapCons<f32>,
    converter: RateConverter,
    fault: Arc<Mutex<Option<String>>>,
    drained: Vec<f32>,
    converted: Vec<f32>,
    /// Encoded PCM16 not yet handed out.
    pending: Vec<u8>,
}

impl PcmStream for MicrophoneStream {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(message) = self.fault.lock().take() {
            return Err(LivescribeError::CaptureRead(message));
        }
        if self.stream.is_none() {
            return Ok(0);
        }

        while self.pending.len() < buf.len() {
            let n = self.consumer.pop_slice(&mut self.drained);
            if n == 0 {
                break;
            }
            self.converted.clear();
            self.converter.process_into(&self.drained[..n], &mut self.converted);
            encode_pcm16(&self.converted, &mut self.pending);
        }

        // Fixed-size frames: wait until a full buffer is available.
        if self.pending.len() < buf.len() {
            return Ok(0);
        }
        let n = buf.len() & !1;
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn stop_and_release(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("failed to pause input stream: {e}");
            }
            drop(stream);
            info!("input device released");
        }
    }
}
