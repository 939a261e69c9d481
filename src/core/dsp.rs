//! Spectrogram helpers matching HTDemucs' "complex as channels" layout.
//!
//! The forward transform pads the window the way HTDemucs does before
//! `torch.stft(center=True, normalized=True)`, drops the Nyquist bin and
//! keeps `ceil(T / hop)` frames. The inverse undoes exactly that.

use num_complex::Complex32;
use rayon::prelude::*;
use rustfft::FftPlanner;

/// Split interleaved samples into `[left, right]` frames.
/// Mono is duplicated; extra channels beyond the first two are dropped.
pub fn to_planar_stereo(samples: &[f32], channels: u16) -> Vec<[f32; 2]> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().map(|&s| [s, s]).collect(),
        n => samples
            .chunks_exact(n as usize)
            .map(|f| [f[0], f[1]])
            .collect(),
    }
}

/// Periodic Hann window, as `torch.hann_window(n)`.
pub fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let x = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            (0.5 - 0.5 * x.cos()) as f32
        })
        .collect()
}

/// Reflect index into `0..len` without repeating the edge sample.
fn reflect(mut i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    i = i.rem_euclid(period);
    if i >= len as isize {
        i = period - i;
    }
    i as usize
}

fn reflect_pad(x: &[f32], left: usize, right: usize) -> Vec<f32> {
    if x.is_empty() {
        return vec![0.0; left + right];
    }
    let total = left + x.len() + right;
    (0..total)
        .map(|i| x[reflect(i as isize - left as isize, x.len())])
        .collect()
}

fn frames_for(len: usize, hop: usize) -> usize {
    len.div_ceil(hop)
}

/// Forward STFT of a stereo window.
///
/// Returns `(data, F, frames)` with data laid out `[4, F, frames]` as
/// `L.re, L.im, R.re, R.im`, `F = nfft / 2`, `frames = ceil(T / hop)`.
pub fn stft_cac_stereo_centered(
    left: &[f32],
    right: &[f32],
    nfft: usize,
    hop: usize,
) -> (Vec<f32>, usize, usize) {
    let t = left.len().min(right.len());
    let f_bins = nfft / 2;
    let frames = frames_for(t, hop);
    let pad = hop / 2 * 3;

    let window = hann(nfft);
    let fft = FftPlanner::<f32>::new().plan_fft_forward(nfft);
    let scale = 1.0 / (nfft as f32).sqrt();

    let mut out = vec![0.0f32; 4 * f_bins * frames];
    let mut buf = vec![Complex32::new(0.0, 0.0); nfft];

    for (c, x) in [&left[..t], &right[..t]].into_iter().enumerate() {
        let padded = reflect_pad(x, pad, pad + frames * hop - t);
        let centered = reflect_pad(&padded, nfft / 2, nfft / 2);

        let re_base = (2 * c) * f_bins * frames;
        let im_base = (2 * c + 1) * f_bins * frames;

        for fr in 0..frames {
            // HTDemucs drops the first two frames of the centered STFT.
            let start = (fr + 2) * hop;
            for (i, b) in buf.iter_mut().enumerate() {
                *b = Complex32::new(centered[start + i] * window[i], 0.0);
            }
            fft.process(&mut buf);
            for f in 0..f_bins {
                out[re_base + f * frames + fr] = buf[f].re * scale;
                out[im_base + f * frames + fr] = buf[f].im * scale;
            }
        }
    }

    (out, f_bins, frames)
}

fn istft_channel(
    re: &[f32],
    im: &[f32],
    f_bins: usize,
    frames: usize,
    nfft: usize,
    hop: usize,
    length: usize,
    window: &[f32],
    ifft: &dyn rustfft::Fft<f32>,
) -> Vec<f32> {
    let pad = hop / 2 * 3;
    let le = hop * frames_for(length, hop) + 2 * pad;
    // Two silent frames on each side, mirroring the forward crop.
    let total_frames = frames + 4;
    let ola_len = nfft + hop * (total_frames - 1);

    let mut ola = vec![0.0f32; ola_len];
    let mut env = vec![0.0f32; ola_len];
    let mut buf = vec![Complex32::new(0.0, 0.0); nfft];
    let scale = 1.0 / (nfft as f32).sqrt();

    for fr in 0..total_frames {
        let offset = fr * hop;
        if fr >= 2 && fr < frames + 2 {
            let src = fr - 2;
            buf.iter_mut().for_each(|b| *b = Complex32::new(0.0, 0.0));
            for f in 0..f_bins.min(nfft / 2 + 1) {
                let v = Complex32::new(re[f * frames + src], im[f * frames + src]);
                if f == 0 {
                    buf[0] = Complex32::new(v.re, 0.0);
                } else {
                    buf[f] = v;
                    buf[nfft - f] = v.conj();
                }
            }
            ifft.process(&mut buf);
            for i in 0..nfft {
                ola[offset + i] += buf[i].re * scale * window[i];
            }
        }
        for i in 0..nfft {
            env[offset + i] += window[i] * window[i];
        }
    }

    let start = nfft / 2 + pad;
    (start..start + length)
        .map(|n| {
            if n < ola_len && n < nfft / 2 + le && env[n] > 1e-11 {
                ola[n] / env[n]
            } else {
                0.0
            }
        })
        .collect()
}

/// Inverse of [`stft_cac_stereo_centered`] for several sources at once.
/// Each entry of `specs` is one source laid out `[4, F, frames]`.
pub fn istft_cac_stereo_parallel(
    specs: &[&[f32]],
    f_bins: usize,
    frames: usize,
    nfft: usize,
    hop: usize,
    length: usize,
) -> Vec<(Vec<f32>, Vec<f32>)> {
    let window = hann(nfft);
    let ifft = FftPlanner::<f32>::new().plan_fft_inverse(nfft);
    let plane = f_bins * frames;

    specs
        .par_iter()
        .map(|spec| {
            let ch = |c: usize| {
                istft_channel(
                    &spec[(2 * c) * plane..(2 * c + 1) * plane],
                    &spec[(2 * c + 1) * plane..(2 * c + 2) * plane],
                    f_bins,
                    frames,
                    nfft,
                    hop,
                    length,
                    &window,
                    ifft.as_ref(),
                )
            };
            (ch(0), ch(1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn planar_stereo_handles_channel_counts() {
        assert_eq!(to_planar_stereo(&[0.5, -0.5], 1), vec![[0.5, 0.5], [-0.5, -0.5]]);
        assert_eq!(to_planar_stereo(&[1.0, 2.0, 3.0, 4.0], 2), vec![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(
            to_planar_stereo(&[1.0, 2.0, 9.0, 3.0, 4.0, 9.0], 3),
            vec![[1.0, 2.0], [3.0, 4.0]]
        );
        assert!(to_planar_stereo(&[1.0], 0).is_empty());
    }

    #[test]
    fn reflect_matches_torch_reflect_padding() {
        assert_eq!(reflect_pad(&[1.0, 2.0, 3.0, 4.0], 2, 2), vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
    }

    #[test]
    fn hann_is_periodic() {
        let w = hann(8);
        assert_abs_diff_eq!(w[0], 0.0);
        assert_abs_diff_eq!(w[4], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(w[1], w[7], epsilon = 1e-6);
    }

    #[test]
    fn htdemucs_window_dims() {
        let t = 343_980;
        let x = vec![0.0f32; t];
        let (spec, f, frames) = stft_cac_stereo_centered(&x, &x, 4096, 1024);
        assert_eq!((f, frames), (2048, 336));
        assert_eq!(spec.len(), 4 * 2048 * 336);
    }

    #[test]
    fn stft_istft_reconstructs_interior() {
        let nfft = 512;
        let hop = 128;
        let t = 6000;
        let left: Vec<f32> = (0..t).map(|i| (i as f32 * 0.013).sin() * 0.6).collect();
        let right: Vec<f32> = (0..t).map(|i| (i as f32 * 0.031).cos() * 0.3).collect();

        let (spec, f, frames) = stft_cac_stereo_centered(&left, &right, nfft, hop);
        let out = istft_cac_stereo_parallel(&[&spec, &spec], f, frames, nfft, hop, t);
        assert_eq!(out.len(), 2);

        let (l, r) = &out[1];
        assert_eq!(l.len(), t);
        for i in nfft..t - nfft {
            assert_abs_diff_eq!(l[i], left[i], epsilon = 1e-3);
            assert_abs_diff_eq!(r[i], right[i], epsilon = 1e-3);
        }
    }
}
