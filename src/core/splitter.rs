use crate::{
    core::{
        audio::{normalize_peak, read_audio_any, resample, write_wav},
        dsp::to_planar_stereo,
        engine,
    },
    error::{Result, StemError},
    io::progress::{emit_split_progress, SplitProgress},
    model::model_manager::resolve_model,
    types::{AudioData, SplitMode, SplitOptions},
};

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

/// Sources produced by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stem {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl Stem {
    pub fn all() -> &'static [Stem] {
        &[Stem::Vocals, Stem::Drums, Stem::Bass, Stem::Other]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stem::Vocals => "vocals",
            Stem::Drums => "drums",
            Stem::Bass => "bass",
            Stem::Other => "other",
        }
    }

    fn default_index(&self) -> usize {
        match self {
            Stem::Vocals => 0,
            Stem::Drums => 1,
            Stem::Bass => 2,
            Stem::Other => 3,
        }
    }
}

/// Separated audio held in memory.
///
/// ```no_run
/// use stem_splitter_cloud::{Separator, SplitMode, SplitOptions, Stem};
///
/// let stems = Separator::separate("song.mp3", &SplitOptions::default())?;
/// let instrumental = stems.mix_except_audio(&[Stem::Vocals]);
/// for (name, audio) in stems.stems_for(SplitMode::TwoStems) {
///     println!("{name}: {} frames", audio.frames());
/// }
/// stems.save(Stem::Vocals, "vocals.wav")?;
/// # Ok::<(), stem_splitter_cloud::StemError>(())
/// ```
#[derive(Clone, Debug)]
pub struct SeparatedStems {
    stems: HashMap<Stem, Vec<[f32; 2]>>,
    pub sample_rate: u32,
    /// Frames per stem.
    pub num_samples: usize,
}

impl SeparatedStems {
    /// Build from per-stem stereo frames. Missing stems read as silence.
    pub fn from_frames(stems: HashMap<Stem, Vec<[f32; 2]>>, sample_rate: u32) -> Self {
        let num_samples = stems.values().map(|s| s.len()).max().unwrap_or(0);
        Self {
            stems,
            sample_rate,
            num_samples,
        }
    }

    /// Interleaved stereo samples for one stem.
    pub fn get(&self, stem: Stem) -> Vec<f32> {
        self.mix(&[stem])
    }

    pub fn get_audio(&self, stem: Stem) -> AudioData {
        self.wrap(self.get(stem))
    }

    /// Sum several stems into interleaved stereo.
    pub fn mix(&self, stems: &[Stem]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.num_samples * 2];
        for stem in stems {
            if let Some(data) = self.stems.get(stem) {
                for (i, s) in data.iter().enumerate() {
                    out[i * 2] += s[0];
                    out[i * 2 + 1] += s[1];
                }
            }
        }
        out
    }

    pub fn mix_audio(&self, stems: &[Stem]) -> AudioData {
        self.wrap(self.mix(stems))
    }

    pub fn mix_except(&self, exclude: &[Stem]) -> Vec<f32> {
        let include: Vec<Stem> = Stem::all()
            .iter()
            .copied()
            .filter(|s| !exclude.contains(s))
            .collect();
        self.mix(&include)
    }

    pub fn mix_except_audio(&self, exclude: &[Stem]) -> AudioData {
        self.wrap(self.mix_except(exclude))
    }

    /// Named outputs for a split mode, in publishing order.
    /// Two-stem mode yields `vocals` and `instrumental` (drums + bass + other).
    pub fn stems_for(&self, mode: SplitMode) -> Vec<(String, AudioData)> {
        match mode {
            SplitMode::TwoStems => vec![
                ("vocals".to_string(), self.get_audio(Stem::Vocals)),
                ("instrumental".to_string(), self.mix_except_audio(&[Stem::Vocals])),
            ],
            SplitMode::FourStems => Stem::all()
                .iter()
                .map(|s| (s.name().to_string(), self.get_audio(*s)))
                .collect(),
        }
    }

    pub fn save(&self, stem: Stem, path: impl AsRef<Path>) -> Result<()> {
        write_wav(path, &self.get_audio(stem))
    }

    fn wrap(&self, samples: Vec<f32>) -> AudioData {
        AudioData {
            samples,
            sample_rate: self.sample_rate,
            channels: 2,
        }
    }
}

/// Write each `(name, audio)` pair to `dir/{name}.wav`, creating `dir` if needed.
pub fn save_stems(stems: &[(String, AudioData)], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let total = stems.len();
    let mut written = Vec::with_capacity(total);
    for (i, (name, audio)) in stems.iter().enumerate() {
        let path = dir.join(format!("{name}.wav"));
        write_wav(&path, audio)?;
        emit_split_progress(SplitProgress::Writing {
            stem: name.clone(),
            done: i + 1,
            total,
            percent: (i + 1) as f32 / total as f32 * 100.0,
        });
        tracing::info!(path = %path.display(), "saved stem locally");
        written.push(path);
    }
    Ok(written)
}

/// Runs the separation model over whole files.
pub struct Separator;

impl Separator {
    /// Decode, peak-normalise, separate and return stems at the input's sample rate.
    pub fn separate(input_path: impl AsRef<Path>, opts: &SplitOptions) -> Result<SeparatedStems> {
        emit_split_progress(SplitProgress::Stage("resolve_model"));
        let handle = resolve_model(opts)?;

        emit_split_progress(SplitProgress::Stage("engine_preload"));
        engine::preload(&handle)?;
        let mf = engine::manifest()?;

        emit_split_progress(SplitProgress::Stage("read_audio"));
        let mut audio = read_audio_any(input_path.as_ref())?;
        normalize_peak(&mut audio);
        let original_rate = audio.sample_rate;

        let model_audio = if original_rate != mf.sample_rate {
            tracing::info!(from = original_rate, to = mf.sample_rate, "resampling input for model");
            resample(&audio, mf.sample_rate)?
        } else {
            audio
        };

        let stereo = to_planar_stereo(&model_audio.samples, model_audio.channels);
        let names = if mf.stems.is_empty() {
            Stem::all().iter().map(|s| s.name().to_string()).collect()
        } else {
            mf.stems.clone()
        };

        emit_split_progress(SplitProgress::Stage("infer"));
        let acc = separate_frames(&stereo, mf.window, mf.hop, engine::run_window_demucs)?;

        let mut name_idx: HashMap<String, usize> = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            name_idx.insert(name.to_lowercase(), i);
        }

        let mut stems = HashMap::new();
        for stem in Stem::all() {
            let idx = name_idx
                .get(stem.name())
                .copied()
                .unwrap_or(stem.default_index())
                .min(acc.len().saturating_sub(1));
            let frames = acc.get(idx).cloned().unwrap_or_default();
            stems.insert(*stem, frames);
        }

        let mut separated = SeparatedStems::from_frames(stems, mf.sample_rate);
        if original_rate != mf.sample_rate {
            emit_split_progress(SplitProgress::Stage("resample_stems"));
            separated = resample_stems(&separated, original_rate)?;
        }

        emit_split_progress(SplitProgress::Finished);
        Ok(separated)
    }
}

fn resample_stems(stems: &SeparatedStems, rate: u32) -> Result<SeparatedStems> {
    let mut out = HashMap::new();
    for stem in Stem::all() {
        let back = resample(&stems.get_audio(*stem), rate)?;
        out.insert(*stem, to_planar_stereo(&back.samples, 2));
    }
    Ok(SeparatedStems::from_frames(out, rate))
}

/// Triangular overlap-add weights peaking at the window centre.
fn triangle_weights(win: usize) -> Vec<f32> {
    let half = win / 2;
    let peak = half.max(win - half) as f32;
    (0..win)
        .map(|i| {
            let w = if i < half { i + 1 } else { win - i };
            w as f32 / peak
        })
        .collect()
}

fn window_count(n: usize, win: usize, hop: usize) -> usize {
    if n <= win {
        1
    } else {
        1 + (n - win).div_ceil(hop)
    }
}

/// Slide `run` over `stereo` in windows of `win` frames advancing by `hop`,
/// blending overlapping outputs. Returns `[source][frame] = [L, R]`.
pub(crate) fn separate_frames<F>(
    stereo: &[[f32; 2]],
    win: usize,
    hop: usize,
    mut run: F,
) -> Result<Vec<Vec<[f32; 2]>>>
where
    F: FnMut(&[f32], &[f32]) -> Result<ndarray::Array3<f32>>,
{
    let n = stereo.len();
    if n == 0 {
        return Err(StemError::Decode("Empty audio".into()));
    }
    if !(win > 0 && hop > 0 && hop <= win) {
        return Err(StemError::Manifest(format!("bad window/hop {win}/{hop}")));
    }

    let weights = triangle_weights(win);
    let total = window_count(n, win, hop);

    let mut left = vec![0f32; win];
    let mut right = vec![0f32; win];
    let mut acc: Vec<Vec<[f32; 2]>> = Vec::new();
    let mut wsum = vec![0f32; n];

    let mut pos = 0usize;
    let mut done = 0usize;
    loop {
        for i in 0..win {
            let [l, r] = stereo.get(pos + i).copied().unwrap_or([0.0, 0.0]);
            left[i] = l;
            right[i] = r;
        }

        let out = run(&left, &right)?;
        let (sources, _, t_out) = out.dim();
        if acc.is_empty() {
            acc = vec![vec![[0f32; 2]; n]; sources];
        } else if sources != acc.len() {
            return Err(StemError::Anyhow(anyhow::anyhow!(
                "model changed source count from {} to {}",
                acc.len(),
                sources
            )));
        }

        let len = win.min(t_out).min(n - pos);
        for (st, frames) in acc.iter_mut().enumerate() {
            for i in 0..len {
                let w = weights[i];
                frames[pos + i][0] += out[(st, 0, i)] * w;
                frames[pos + i][1] += out[(st, 1, i)] * w;
            }
        }
        for i in 0..len {
            wsum[pos + i] += weights[i];
        }

        done += 1;
        emit_split_progress(SplitProgress::Chunks {
            done,
            total,
            percent: done as f32 / total as f32 * 100.0,
        });

        if pos + win >= n {
            break;
        }
        pos += hop;
    }

    for frames in acc.iter_mut() {
        for (f, w) in frames.iter_mut().zip(&wsum) {
            if *w > 0.0 {
                f[0] /= w;
                f[1] /= w;
            }
        }
    }

    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn stems_fixture() -> SeparatedStems {
        let mut map = HashMap::new();
        map.insert(Stem::Vocals, vec![[1.0, 2.0]; 3]);
        map.insert(Stem::Drums, vec![[0.5, 0.5]; 3]);
        map.insert(Stem::Bass, vec![[0.25, -0.25]; 3]);
        map.insert(Stem::Other, vec![[0.0, 1.0]; 3]);
        SeparatedStems::from_frames(map, 48000)
    }

    #[test]
    fn save_stems_writes_one_wav_per_stem() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("nested/out");
        let stems = stems_fixture().stems_for(SplitMode::TwoStems);

        let written = save_stems(&stems, &out_dir).unwrap();

        assert_eq!(written, [out_dir.join("vocals.wav"), out_dir.join("instrumental.wav")]);
        let back = crate::core::audio::read_audio(&written[1]).unwrap();
        assert_eq!(back.sample_rate, 48000);
        assert_eq!(back.samples[..2], [0.75, 1.25]);
    }

    #[test]
    fn two_stem_mode_sums_instrumental() {
        let stems = stems_fixture();
        let out = stems.stems_for(SplitMode::TwoStems);
        let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["vocals", "instrumental"]);
        assert_eq!(out[0].1.samples[..2], [1.0, 2.0]);
        assert_eq!(out[1].1.samples[..2], [0.75, 1.25]);
        assert_eq!(out[1].1.sample_rate, 48000);
        assert_eq!(out[1].1.channels, 2);
    }

    #[test]
    fn four_stem_mode_keeps_order() {
        let out = stems_fixture().stems_for(SplitMode::FourStems);
        let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["vocals", "drums", "bass", "other"]);
        assert_eq!(out[2].1.samples[..2], [0.25, -0.25]);
    }

    #[test]
    fn missing_stem_is_silent() {
        let mut map = HashMap::new();
        map.insert(Stem::Vocals, vec![[1.0, 1.0]; 2]);
        let stems = SeparatedStems::from_frames(map, 44100);
        assert_eq!(stems.get(Stem::Bass), vec![0.0; 4]);
    }

    #[test]
    fn save_writes_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocals.wav");
        stems_fixture().save(Stem::Vocals, &path).unwrap();
        let back = crate::core::audio::read_audio(&path).unwrap();
        assert_eq!(back.samples, vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn triangle_weights_are_positive_and_peak_at_one() {
        let w = triangle_weights(7);
        assert!(w.iter().all(|x| *x > 0.0));
        assert_abs_diff_eq!(w.iter().cloned().fold(0.0, f32::max), 1.0);
        assert_abs_diff_eq!(w[0], w[6]);
    }

    #[test]
    fn overlap_add_reconstructs_identity_model() {
        let n = 1000;
        let stereo: Vec<[f32; 2]> = (0..n).map(|i| [i as f32, -(i as f32)]).collect();
        let mut calls = 0;
        let acc = separate_frames(&stereo, 256, 100, |l, r| {
            calls += 1;
            let t = l.len();
            let mut v = Vec::with_capacity(2 * t);
            v.extend_from_slice(l);
            v.extend_from_slice(r);
            Ok(Array3::from_shape_vec((1, 2, t), v)?)
        })
        .unwrap();

        assert_eq!(calls, window_count(n, 256, 100));
        assert_eq!(acc.len(), 1);
        for (i, f) in acc[0].iter().enumerate() {
            assert_abs_diff_eq!(f[0], i as f32, epsilon = 1e-3);
            assert_abs_diff_eq!(f[1], -(i as f32), epsilon = 1e-3);
        }
    }

    #[test]
    fn short_input_runs_single_window() {
        let stereo = vec![[0.1, 0.2]; 10];
        let mut calls = 0;
        let acc = separate_frames(&stereo, 64, 32, |l, r| {
            calls += 1;
            let mut v = l.to_vec();
            v.extend_from_slice(r);
            Ok(Array3::from_shape_vec((1, 2, l.len()), v)?)
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(acc[0].len(), 10);
    }

    #[test]
    fn rejects_empty_and_bad_hop() {
        let ok = |_: &[f32], _: &[f32]| -> Result<Array3<f32>> { unreachable!() };
        assert!(separate_frames(&[], 4, 2, ok).is_err());
        assert!(separate_frames(&[[0.0, 0.0]], 4, 8, ok).is_err());
    }
}
