//! End-to-end runs against the mock engine: `cargo test --features engine-mock`.
#![cfg(feature = "engine-mock")]

use httpmock::prelude::*;
use stem_splitter_cloud::{
    core::audio::write_wav, separate_and_publish, AudioData, OutputFormat, PublishOptions,
    RetryPolicy, S3Store, Separator, SplitMode, SplitOptions, Stem, StorageConfig,
};
use std::path::{Path, PathBuf};

fn tone(path: &Path, rate: u32, frames: usize) {
    let samples = (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate as f32).sin() * 0.3)
        .collect();
    write_wav(
        path,
        &AudioData {
            samples,
            sample_rate: rate,
            channels: 1,
        },
    )
    .unwrap();
}

fn split_opts(dir: &Path) -> SplitOptions {
    let model: PathBuf = dir.join("mock.onnx");
    std::fs::write(&model, b"mock").unwrap();
    SplitOptions {
        model_path: Some(model.to_string_lossy().into_owned()),
        ..SplitOptions::default()
    }
}

#[test]
fn separation_keeps_rate_and_length() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("mono.wav");
    tone(&input, 44100, 22050);

    let stems = Separator::separate(&input, &split_opts(dir.path())).unwrap();
    assert_eq!(stems.sample_rate, 44100);
    assert_eq!(stems.num_samples, 22050);

    // Mono input is duplicated and peak-normalised; the mock splits it into equal quarters.
    let full = stems.mix(Stem::all());
    let peak = full.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!((peak - 1.0).abs() < 1e-3, "peak {peak}");
    assert_eq!(full[200], full[201]);
}

#[test]
fn resampled_input_comes_back_at_original_rate() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("hi.wav");
    tone(&input, 48000, 24000);

    let stems = Separator::separate(&input, &split_opts(dir.path())).unwrap();
    assert_eq!(stems.sample_rate, 48000);
    assert_eq!(stems.num_samples, 24000);
}

#[test]
fn four_stem_publish_uploads_each_stem() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.wav");
    tone(&input, 44100, 4410);

    let server = MockServer::start();
    let puts = server.mock(|when, then| {
        when.method(PUT).path_contains("/stems-bucket/stems/");
        then.status(200);
    });

    let store = S3Store::new(StorageConfig {
        bucket: "stems-bucket".into(),
        region: "us-west-2".into(),
        endpoint: Some(server.base_url()),
        access_key_id: "AKID".into(),
        secret_access_key: "secret".into(),
        session_token: None,
        key_prefix: "stems".into(),
        public_read: true,
    });
    let opts = PublishOptions {
        format: OutputFormat::Wav,
        mode: SplitMode::FourStems,
        retry: RetryPolicy::immediate(2),
        split: split_opts(dir.path()),
        save_dir: Some(dir.path().join("local")),
    };

    let report = separate_and_publish(&input, &opts, "stems", &store).unwrap();

    puts.assert_hits(4);
    assert_eq!(report.original_sample_rate, 44100);
    let names: Vec<&str> = report.stems.keys().map(String::as_str).collect();
    assert_eq!(names, ["vocals", "drums", "bass", "other"]);
    assert!(report.stems.values().all(|u| u.ends_with("_song.wav")));
    for name in names {
        assert!(dir.path().join("local").join(format!("{name}.wav")).is_file(), "{name}");
    }
}
