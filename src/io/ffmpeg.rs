//! Thin wrapper around the `ffmpeg` executable.

use crate::error::{Result, StemError};

use std::{
    io::ErrorKind,
    path::Path,
    process::{Command, Stdio},
};

pub const FFMPEG_ENV: &str = "FFMPEG_PATH";

fn ffmpeg_bin() -> String {
    std::env::var(FFMPEG_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "ffmpeg".to_string())
}

/// Run ffmpeg with `args`, failing with the tail of stderr on a non-zero exit.
pub fn run_ffmpeg(args: &[&str]) -> Result<()> {
    let bin = ffmpeg_bin();
    tracing::debug!(%bin, ?args, "running ffmpeg");

    let output = Command::new(&bin)
        .args(["-hide_banner", "-nostdin", "-loglevel", "error"])
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StemError::Encode(format!("'{bin}' not found; install ffmpeg or set {FFMPEG_ENV}"))
            } else {
                StemError::Io(e)
            }
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    Err(StemError::Encode(format!(
        "ffmpeg exited with {}: {}",
        output.status,
        tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
    )))
}

/// Decode anything ffmpeg understands into a 32-bit float WAV at `output`.
pub fn transcode_to_wav(input: &Path, output: &Path) -> Result<()> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    run_ffmpeg(&["-i", &input, "-vn", "-acodec", "pcm_f32le", "-f", "wav", "-y", &output])
}

/// Encode a WAV file to 320 kbit/s MP3, keeping `sample_rate`.
pub fn wav_to_mp3(input: &Path, output: &Path, sample_rate: u32) -> Result<()> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let rate = sample_rate.to_string();
    run_ffmpeg(&[
        "-i", &input, "-acodec", "libmp3lame", "-ab", "320k", "-ar", &rate, "-f", "mp3", "-y",
        &output,
    ])
}
