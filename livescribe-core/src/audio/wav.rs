//! WAV replay capture source.
//!
//! Plays a mono 16-bit WAV file through the capture loop as if it were a
//! microphone. With `realtime` pacing each read sleeps for the duration of
//! the audio it returned; without it the file is read as fast as the loop
//! asks. After the last sample every read reports "no data yet".

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavIntoSamples, WavReader};
use tracing::{debug, info};

use super::{CaptureBackend, CaptureFormat, PcmStream};
use crate::error::{LivescribeError, Result};

#[derive(Debug, Clone)]
pub struct WavFileBackend {
    path: PathBuf,
    realtime: bool,
}

impl WavFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: false,
        }
    }

    /// Pace reads at the file's own sample rate.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self, format: &CaptureFormat) -> Result<WavReader<BufReader<File>>> {
        let reader = WavReader::open(&self.path).map_err(|e| {
            LivescribeError::AudioUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int
            || spec.bits_per_sample != format.bits_per_sample
            || spec.channels != format.channels
            || spec.sample_rate != format.sample_rate
        {
            return Err(LivescribeError::AudioUnavailable(format!(
                "{} is {} Hz / {} ch / {}-bit {:?}, requested {} Hz / {} ch / {}-bit",
                self.path.display(),
                spec.sample_rate,
                spec.channels,
                spec.bits_per_sample,
                spec.sample_format,
                format.sample_rate,
                format.channels,
                format.bits_per_sample,
            )));
        }
        Ok(reader)
    }
}

impl CaptureBackend for WavFileBackend {
    fn name(&self) -> &str {
        "wav"
    }

    fn min_buffer_size(&self, format: &CaptureFormat) -> Result<usize> {
        if !format.is_mono16() {
            return Err(LivescribeError::AudioUnavailable(format!(
                "WAV replay supports mono 16-bit PCM only, got {format:?}"
            )));
        }
        self.reader(format)?;
        // 100 ms of audio
        Ok(format.bytes_per_second() / 10)
    }

    fn open(&self, format: &CaptureFormat, _buffer_size: usize) -> Result<Box<dyn PcmStream>> {
        let reader = self.reader(format)?;
        info!(
            path = %self.path.display(),
            samples = reader.len(),
            realtime = self.realtime,
            "replaying WAV file as capture source"
        );
        Ok(Box::new(WavStream {
            samples: Some(reader.into_samples::<i16>()),
            bytes_per_second: format.bytes_per_second(),
            realtime: self.realtime,
        }))
    }
}

struct WavStream {
    samples: Option<WavIntoSamples<BufReader<File>, i16>>,
    bytes_per_second: usize,
    realtime: bool,
}

impl PcmStream for WavStream {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(samples) = self.samples.as_mut() else {
            return Ok(0);
        };

        let mut n = 0;
        while n + 2 <= buf.len() {
            match samples.next() {
                Some(Ok(sample)) => {
                    buf[n..n + 2].copy_from_slice(&sample.to_le_bytes());
                    n += 2;
                }
                Some(Err(e)) => {
                    self.samples = None;
                    return Err(LivescribeError::CaptureRead(e.to_string()));
                }
                None => {
                    debug!("WAV replay reached end of file");
                    self.samples = None;
                    break;
                }
            }
        }

        if self.realtime && n > 0 {
            let secs = n as f64 / self.bytes_per_second.max(1) as f64;
            std::thread::sleep(Duration::from_secs_f64(secs));
        }
        Ok(n)
    }

    fn stop_and_release(&mut self) {
        self.samples = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for s in samples {
            writer.write_sample(*s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }

    #[test]
    fn replays_samples_as_little_endian_pcm() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("three.wav");
        write_wav(&path, 16_000, 1, &[1, -2, 300]);

        let backend = WavFileBackend::new(&path);
        let format = CaptureFormat::mono16(16_000);
        assert_eq!(backend.min_buffer_size(&format).expect("min"), 3_200);

        let mut stream = backend.open(&format, 4096).expect("open");
        let mut buf = vec![0u8; 4];
        assert_eq!(stream.read_frame(&mut buf).expect("read"), 4);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 1);
        assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), -2);
        assert_eq!(stream.read_frame(&mut buf).expect("read"), 2);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 300);
        assert_eq!(stream.read_frame(&mut buf).expect("read"), 0);
    }

    #[test]
    fn mismatched_rate_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("8k.wav");
        write_wav(&path, 8_000, 1, &[0; 16]);

        let err = WavFileBackend::new(&path)
            .min_buffer_size(&CaptureFormat::mono16(16_000))
            .expect_err("rate mismatch should be rejected");
        assert!(matches!(err, LivescribeError::AudioUnavailable(_)));
    }

    #[test]
    fn stereo_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 16_000, 2, &[0; 16]);

        assert!(WavFileBackend::new(&path)
            .open(&CaptureFormat::mono16(16_000), 4096)
            .is_err());
    }

    #[test]
    fn missing_file_is_audio_unavailable() {
        let err = WavFileBackend::new("/nonexistent/livescribe.wav")
            .min_buffer_size(&CaptureFormat::mono16(16_000))
            .expect_err("missing file");
        assert!(matches!(err, LivescribeError::AudioUnavailable(_)));
    }
}
