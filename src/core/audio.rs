use crate::{
    error::{Result, StemError},
    io::ffmpeg::transcode_to_wav,
    types::AudioData,
};

use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::{
    fs::File,
    io::{Cursor, ErrorKind},
    path::Path,
};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

/// Used when the container does not report a sample rate.
pub const FALLBACK_SAMPLE_RATE: u32 = 44_100;

const RESAMPLE_CHUNK: usize = 1024;
const SINC_LEN: usize = 256;

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let src = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    Ok(probed.format)
}

/// Sample rate of the first audio track, or 44.1 kHz if it cannot be determined.
pub fn probe_sample_rate(path: impl AsRef<Path>) -> u32 {
    let path = path.as_ref();
    let rate = open_format(path).ok().and_then(|format| {
        format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .and_then(|t| t.codec_params.sample_rate)
    });

    match rate {
        Some(r) if r > 0 => r,
        _ => {
            tracing::warn!(
                path = %path.display(),
                fallback = FALLBACK_SAMPLE_RATE,
                "could not detect sample rate"
            );
            FALLBACK_SAMPLE_RATE
        }
    }
}

/// Decode an audio file into interleaved f32 samples.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_audio(path: impl AsRef<Path>) -> Result<AudioData> {
    let mut format = open_format(path.as_ref())?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| StemError::Decode("no supported audio tracks".into()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                channels.get_or_insert(spec.channels.count() as u16);

                let needed = decoded.capacity() * spec.channels.count();
                if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::warn!(ts = packet.ts(), %msg, "skipping undecodable packet");
            }
            Err(SymphoniaError::IoError(err)) => {
                tracing::warn!(ts = packet.ts(), %err, "skipping packet after I/O error");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| StemError::Decode("unknown sample rate".into()))?;
    let channels = channels
        .filter(|c| *c > 0)
        .ok_or_else(|| StemError::Decode("unknown channel layout".into()))?;

    tracing::debug!(sample_rate, channels, samples = samples.len(), "audio decoded");

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// Decode natively, falling back to an ffmpeg transcode for formats symphonia can't handle.
pub fn read_audio_any(path: impl AsRef<Path>) -> Result<AudioData> {
    let path = path.as_ref();
    match read_audio(path) {
        Ok(audio) if !audio.samples.is_empty() => Ok(audio),
        Ok(_) => Err(StemError::Decode(format!("{} contains no audio", path.display()))),
        Err(StemError::Io(e)) => Err(StemError::Io(e)),
        Err(native) => {
            tracing::info!(%native, "native decode failed, converting with ffmpeg");
            let tmp = tempfile::Builder::new()
                .prefix("stem-input-")
                .suffix(".wav")
                .tempfile()?;
            transcode_to_wav(path, tmp.path())
                .map_err(|e| StemError::Decode(format!("{native}; ffmpeg fallback failed: {e}")))?;
            read_audio(tmp.path())
        }
    }
}

/// Scale so the loudest sample has magnitude 1.0. Silence is left untouched.
pub fn normalize_peak(audio: &mut AudioData) {
    let peak = audio
        .samples
        .iter()
        .fold(0.0f32, |m, s| if s.is_finite() { m.max(s.abs()) } else { m });
    if peak > 0.0 {
        let inv = 1.0 / peak;
        audio.samples.iter_mut().for_each(|s| *s *= inv);
    }
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    (0..channels)
        .map(|c| samples.iter().skip(c).step_by(channels).copied().collect())
        .collect()
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map_or(0, |c| c.len());
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for ch in planar {
            out.push(ch[i]);
        }
    }
    out
}

/// Band-limited sinc resampling to `target_rate`.
/// Output has `round(frames * target / source)` frames and is not shifted in time.
pub fn resample(audio: &AudioData, target_rate: u32) -> Result<AudioData> {
    if audio.sample_rate == target_rate || audio.samples.is_empty() {
        return Ok(AudioData {
            samples: audio.samples.clone(),
            sample_rate: target_rate,
            channels: audio.channels,
        });
    }
    if audio.sample_rate == 0 || target_rate == 0 {
        return Err(StemError::Resample("sample rate must be non-zero".into()));
    }

    let ch = audio.channels.max(1) as usize;
    let frames = audio.frames();
    let planar = deinterleave(&audio.samples, ch);
    let ratio = target_rate as f64 / audio.sample_rate as f64;
    let expected = (frames as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, ch)?;

    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + RESAMPLE_CHUNK); ch];
    let append = |out: &mut Vec<Vec<f32>>, block: Vec<Vec<f32>>| {
        for (dst, src) in out.iter_mut().zip(block) {
            dst.extend_from_slice(&src);
        }
    };

    let mut pos = 0usize;
    while pos + RESAMPLE_CHUNK <= frames {
        let block: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + RESAMPLE_CHUNK]).collect();
        append(&mut out, resampler.process(&block, None)?);
        pos += RESAMPLE_CHUNK;
    }
    if pos < frames {
        let block: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
        append(&mut out, resampler.process_partial(Some(block.as_slice()), None)?);
    }
    // SincFixedIn centres its window on the current input position, so output
    // frame n already lines up with input n / ratio. Only the tail needs flushing.
    while out[0].len() < expected {
        let block = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if block.first().map_or(true, |b| b.is_empty()) {
            break;
        }
        append(&mut out, block);
    }

    for c in out.iter_mut() {
        c.resize(expected, 0.0);
    }

    Ok(AudioData {
        samples: interleave(&out),
        sample_rate: target_rate,
        channels: audio.channels,
    })
}

fn wav_spec(audio: &AudioData) -> WavSpec {
    WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Write 32-bit float WAV.
pub fn write_wav(path: impl AsRef<Path>, audio: &AudioData) -> Result<()> {
    let mut writer = WavWriter::create(path, wav_spec(audio))?;
    for s in &audio.samples {
        writer.write_sample(*s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode 32-bit float WAV into memory.
pub fn encode_wav(audio: &AudioData) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(44 + audio.samples.len() * 4);
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), wav_spec(audio))?;
        for s in &audio.samples {
            writer.write_sample(*s)?;
        }
        writer.finalize()?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f32, rate: u32, frames: usize, channels: u16) -> AudioData {
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            let v = (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5;
            for _ in 0..channels {
                samples.push(v);
            }
        }
        AudioData {
            samples,
            sample_rate: rate,
            channels,
        }
    }

    #[test]
    fn normalize_scales_to_unit_peak() {
        let mut a = AudioData {
            samples: vec![0.1, -0.25, 0.2, 0.0],
            sample_rate: 44100,
            channels: 2,
        };
        normalize_peak(&mut a);
        assert_abs_diff_eq!(a.samples[1], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(a.samples[0], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn normalize_leaves_silence() {
        let mut a = AudioData {
            samples: vec![0.0; 8],
            sample_rate: 44100,
            channels: 2,
        };
        normalize_peak(&mut a);
        assert!(a.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn wav_roundtrip_through_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let audio = sine(440.0, 48000, 4800, 2);
        write_wav(&path, &audio).unwrap();

        assert_eq!(probe_sample_rate(&path), 48000);
        let back = read_audio(&path).unwrap();
        assert_eq!(back.sample_rate, 48000);
        assert_eq!(back.channels, 2);
        assert_eq!(back.samples.len(), audio.samples.len());
        assert_abs_diff_eq!(back.samples[101], audio.samples[101], epsilon = 1e-6);
    }

    #[test]
    fn encode_wav_has_riff_header() {
        let bytes = encode_wav(&sine(440.0, 44100, 100, 1)).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert!(bytes.len() >= 44 + 100 * 4);
    }

    #[test]
    fn probe_falls_back_for_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert_eq!(probe_sample_rate(&path), FALLBACK_SAMPLE_RATE);
        assert_eq!(probe_sample_rate(dir.path().join("missing.wav")), FALLBACK_SAMPLE_RATE);
    }

    #[test]
    fn resample_length_and_identity() {
        let a = sine(440.0, 48000, 48000, 2);
        let same = resample(&a, 48000).unwrap();
        assert_eq!(same, a);

        let down = resample(&a, 44100).unwrap();
        assert_eq!(down.sample_rate, 44100);
        assert_eq!(down.channels, 2);
        assert_eq!(down.frames(), 44100);

        // Middle of the signal should still be a 0.5-amplitude tone.
        let peak = down.samples[20000..60000]
            .iter()
            .fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {peak}");
    }

    fn impulse(rate: u32, frames: usize, at: usize) -> AudioData {
        let mut samples = vec![0.0; frames];
        samples[at] = 1.0;
        AudioData {
            samples,
            sample_rate: rate,
            channels: 1,
        }
    }

    fn peak_index(audio: &AudioData) -> usize {
        audio
            .samples
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |(bi, bv), (i, s)| if s.abs() > bv { (i, s.abs()) } else { (bi, bv) })
            .0
    }

    #[test]
    fn resample_keeps_events_in_place() {
        for (from, to) in [(48000u32, 44100u32), (44100, 48000), (8000, 44100)] {
            let ratio = to as f64 / from as f64;
            let out = resample(&impulse(from, 20_000, 5000), to).unwrap();
            let expected = (5000.0 * ratio).round() as i64;
            // One input sample of slack.
            let slack = ratio.ceil().max(1.0) as i64;
            let got = peak_index(&out) as i64;
            assert!(
                (got - expected).abs() <= slack,
                "{from}->{to}: expected {expected}, got {got}"
            );
        }
    }

    #[test]
    fn resample_round_trip_lines_up() {
        let there = resample(&impulse(48000, 20_000, 5000), 44100).unwrap();
        let back = resample(&there, 48000).unwrap();
        assert_eq!(back.frames(), 20_000);
        let got = peak_index(&back) as i64;
        assert!((got - 5000).abs() <= 2, "peak at {got}");
    }
}
