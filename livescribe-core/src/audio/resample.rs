//! Device-rate → recognizer-rate conversion for the microphone backend.
//!
//! `cpal` captures at the device's native rate (commonly 44.1 or 48 kHz)
//! while recognizers are created for the rate passed to `init`.
//! [`RateConverter`] runs a rubato `FastFixedIn` on the capture thread and
//! is a plain copy when the two rates already match.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{LivescribeError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when the rates match.
    resampler: Option<FastFixedIn<f32>>,
    /// Input not yet consumed by rubato (less than one `chunk_size` block).
    pending: Vec<f32>,
    chunk_size: usize,
    /// Scratch output, `[1][output_frames_max]`.
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `AudioUnavailable` if rubato rejects the ratio.
    pub fn new(device_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if device_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                scratch: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / device_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| {
                LivescribeError::AudioUnavailable(format!(
                    "cannot resample {device_rate} Hz to {target_rate} Hz: {e}"
                ))
            })?;
        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];

        info!(device_rate, target_rate, chunk_size, "microphone resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            scratch,
        })
    }

    /// Feed samples in, append whatever full blocks produced to `out`.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(ref mut resampler) = self.resampler else {
            out.extend_from_slice(samples);
            return;
        };

        self.pending.extend_from_slice(samples);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.chunk_size {
            let block = &self.pending[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resampler block dropped: {e}"),
            }
            consumed += self.chunk_size;
        }
        self.pending.drain(..consumed);
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
