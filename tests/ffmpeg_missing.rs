//! Behaviour when the ffmpeg executable cannot be found.
//! Every test here points `FFMPEG_PATH` at the same missing binary.

use stem_splitter_cloud::{
    core::audio::read_audio_any, encode::encode_stem, io::ffmpeg::FFMPEG_ENV, AudioData,
    OutputFormat, StemError,
};

fn without_ffmpeg() {
    std::env::set_var(FFMPEG_ENV, "/nonexistent/ffmpeg");
}

#[test]
fn mp3_encoding_reports_missing_ffmpeg() {
    without_ffmpeg();
    let audio = AudioData {
        samples: vec![0.1, -0.1, 0.2, -0.2],
        sample_rate: 44100,
        channels: 2,
    };

    match encode_stem(&audio, OutputFormat::Mp3) {
        Err(StemError::Encode(msg)) => {
            assert!(msg.contains("not found"), "{msg}");
            assert!(msg.contains("/nonexistent/ffmpeg"), "{msg}");
        }
        other => panic!("expected Encode error, got {other:?}"),
    }
}

#[test]
fn undecodable_input_reports_failed_fallback() {
    without_ffmpeg();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.xyz");
    std::fs::write(&path, b"this is not an audio container").unwrap();

    match read_audio_any(&path) {
        Err(StemError::Decode(msg)) => {
            assert!(msg.contains("ffmpeg fallback failed"), "{msg}");
            assert!(msg.contains("not found"), "{msg}");
        }
        other => panic!("expected Decode error, got {other:?}"),
    }
}

#[test]
fn wav_encoding_does_not_need_ffmpeg() {
    without_ffmpeg();
    let audio = AudioData {
        samples: vec![0.0; 8],
        sample_rate: 22050,
        channels: 1,
    };
    let bytes = encode_stem(&audio, OutputFormat::Wav).unwrap();
    assert_eq!(&bytes[..4], b"RIFF");
}
