use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use livescribe_core::{
    RecognitionSession, SessionConfig, SessionEvent, SessionStatus, StubEngine, WavFileBackend,
};

fn write_tone(path: &Path, sample_rate: u32, samples: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for i in 0..samples {
        let t = i as f32 / sample_rate as f32;
        let s = (t * 440.0 * std::f32::consts::TAU).sin() * 0.25;
        writer
            .write_sample((s * i16::MAX as f32) as i16)
            .expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

#[test]
fn replayed_file_produces_stub_events_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tone.wav");
    // 1.5 s at 16 kHz
    write_tone(&path, 16_000, 24_000);

    let session = RecognitionSession::new(
        Arc::new(StubEngine),
        Arc::new(WavFileBackend::new(&path)),
        SessionConfig::default(),
    )
    .expect("session");
    let (tx, rx) = crossbeam_channel::unbounded();
    let sink = Arc::new(tx);
    session.subscribe(&sink);

    session.init("models/stub", 16_000).expect("init");
    session.start().expect("start");

    // 4096-byte frames: 11 full frames plus a 1472-sample tail.
    let mut events = Vec::new();
    while events.len() < 12 {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent::Recognition(event)) => events.push(event),
            other => panic!("unexpected {other:?}"),
        }
    }
    session.stop();

    let finals: Vec<_> = events.iter().filter(|e| e.is_final).collect();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].seq, 7);
    assert_eq!(finals[0].text, "[stub utterance 1: 16384 samples @ 16000 Hz]");
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert_eq!(events[11].text, "\u{2026} 7616 samples");

    assert_eq!(session.diagnostics().frames_read, 12);
    assert!(rx.try_recv().is_err());
    session.dispose();
    assert_eq!(session.status(), SessionStatus::Disposed);
}

#[test]
fn mismatched_file_is_audio_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("8k.wav");
    write_tone(&path, 8_000, 800);

    let session = RecognitionSession::new(
        Arc::new(StubEngine),
        Arc::new(WavFileBackend::new(&path)),
        SessionConfig::default(),
    )
    .expect("session");
    session.init("models/stub", 16_000).expect("init");

    let err = session.start().expect_err("rate mismatch");
    assert_eq!(err.kind(), livescribe_core::ErrorKind::AudioUnavailable);
    assert_eq!(session.status(), SessionStatus::Ready);
}
