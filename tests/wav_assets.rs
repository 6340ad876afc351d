//! Integration tests for WAV-backed assets
//!
//! Files are written with hound into a temporary directory, decoded by the
//! engine and streamed to headless lines.
#![cfg(feature = "wav")]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use voicebus::{
    AudioEngine, EngineConfig, HeadlessOutput, LoadStatus, Mixer, SampleFormat, WavDecoder,
};

fn write_wav(path: &Path, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 22_050,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for &sample in samples {
        writer.write_sample(sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

fn engine(root: &Path, output: Arc<HeadlessOutput>, config: EngineConfig) -> AudioEngine {
    AudioEngine::builder()
        .config(EngineConfig {
            min_sleep_micros: 100,
            max_sleep_millis: 2,
            ..config
        })
        .mixer(Mixer::new())
        .decoder(Arc::new(WavDecoder::with_root(root)))
        .output(output)
        .build()
        .expect("engine should build")
}

#[test]
fn test_wav_streams_le_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let samples: Vec<i16> = (0..600).map(|i| (i * 37 - 9_000) as i16).collect();
    write_wav(&dir.path().join("step.wav"), &samples);

    let output = Arc::new(HeadlessOutput::new(512));
    let engine = engine(dir.path(), Arc::clone(&output), EngineConfig::default());
    let asset = engine.create_asset("step.wav", None, -3.0);
    assert!(asset.is_loaded());

    let format = asset.format().unwrap();
    assert_eq!(format.channels(), 2);
    assert_eq!(format.sample_rate(), 22_050);
    assert_eq!(format.sample_format(), SampleFormat::I16);
    assert_eq!(asset.resident_bytes(), samples.len() * 2);

    let voice = asset.play_once().unwrap();
    assert!(voice.wait(Duration::from_secs(5)));

    let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let line = &output.lines()[0];
    assert_eq!(line.written, expected);
    assert_eq!(line.format, format);
    assert_eq!(line.last_gain(), Some(-3.0));
}

#[test]
fn test_wav_load_deferred_by_budget() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(&dir.path().join("big.wav"), &vec![0; 20_000]);

    let config = EngineConfig {
        memory_budget_bytes: Some(10_000),
        ..EngineConfig::default()
    };
    let engine = engine(dir.path(), Arc::new(HeadlessOutput::default()), config);
    let asset = engine.create_asset("big.wav", None, 0.0);

    assert!(!asset.is_loaded());
    assert!(!asset.prefetch());
    assert!(matches!(
        asset.try_load(true).unwrap(),
        LoadStatus::Deferred {
            required: 40_000,
            ..
        }
    ));
    assert!(asset.load(false));
    assert_eq!(asset.try_load(true).unwrap(), LoadStatus::AlreadyLoaded);
}

#[test]
fn test_missing_wav_stays_unloaded() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        Arc::new(HeadlessOutput::default()),
        EngineConfig::default(),
    );
    let asset = engine.create_asset("nothing-here.wav", None, 0.0);
    assert!(!asset.is_loaded());
    assert!(asset.try_load(false).is_err());
    assert!(asset.play(0).is_err());
}
