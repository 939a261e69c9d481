use crate::{
    core::audio::{encode_wav, write_wav},
    error::Result,
    io::ffmpeg::wav_to_mp3,
    types::{AudioData, OutputFormat},
};

use std::fs;

/// Encode a stem into the bytes that get uploaded.
pub fn encode_stem(audio: &AudioData, format: OutputFormat) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Wav => encode_wav(audio),
        OutputFormat::Mp3 => {
            let dir = tempfile::Builder::new().prefix("stem-encode-").tempdir()?;
            let wav = dir.path().join("stem.wav");
            let mp3 = dir.path().join("stem.mp3");
            write_wav(&wav, audio)?;
            wav_to_mp3(&wav, &mp3, audio.sample_rate)?;
            Ok(fs::read(&mp3)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_encoding_is_in_memory() {
        let audio = AudioData {
            samples: vec![0.0, 0.5, -0.5, 0.25],
            sample_rate: 22050,
            channels: 2,
        };
        let bytes = encode_stem(&audio, OutputFormat::Wav).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 4);
    }
}
