#![cfg_attr(feature = "engine-mock", allow(dead_code, unused_imports))]

use crate::{
    core::dsp::{istft_cac_stereo_parallel, stft_cac_stereo_centered},
    error::{Result, StemError},
    model::model_manager::ModelHandle,
    types::ModelManifest,
};

use anyhow::anyhow;
use ndarray::Array3;
use once_cell::sync::OnceCell;
use ort::{
    execution_providers::ExecutionProviderDispatch,
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::{Tensor, Value},
};
use std::sync::Mutex;

#[cfg(all(feature = "cuda", any(target_os = "linux", target_os = "windows")))]
use ort::execution_providers::CUDAExecutionProvider;
#[cfg(all(feature = "coreml", target_os = "macos"))]
use ort::execution_providers::CoreMLExecutionProvider;
#[cfg(all(feature = "directml", target_os = "windows"))]
use ort::execution_providers::{DirectMLExecutionProvider, ExecutionProvider};
#[cfg(feature = "onednn")]
use ort::execution_providers::OneDNNExecutionProvider;

static SESSION: OnceCell<Mutex<Session>> = OnceCell::new();
static MANIFEST: OnceCell<ModelManifest> = OnceCell::new();
static ORT_INIT: OnceCell<()> = OnceCell::new();

/// Window length the exported HTDemucs graph was traced with.
pub const DEMUCS_T: usize = 343_980;
const DEMUCS_F: usize = 2048;
const DEMUCS_FRAMES: usize = 336;
const DEMUCS_NFFT: usize = 4096;
const DEMUCS_HOP: usize = 1024;

#[allow(unused_mut)]
fn get_execution_providers() -> Vec<(&'static str, ExecutionProviderDispatch)> {
    let mut providers = Vec::new();

    #[cfg(all(feature = "cuda", any(target_os = "linux", target_os = "windows")))]
    providers.push(("CUDA", CUDAExecutionProvider::default().build()));

    #[cfg(all(feature = "coreml", target_os = "macos"))]
    {
        // CoreML can produce silent outputs on this graph; opt-in only.
        if std::env::var("ENABLE_COREML").is_ok() {
            providers.push(("CoreML", CoreMLExecutionProvider::default().build()));
        } else {
            tracing::info!("CoreML disabled by default (set ENABLE_COREML=1 to enable)");
        }
    }

    #[cfg(all(feature = "directml", target_os = "windows"))]
    {
        for device_id in 0..4 {
            let dml = DirectMLExecutionProvider::default().with_device_id(device_id);
            if let Ok(true) = dml.is_available() {
                tracing::info!(device_id, "DirectML available");
                providers.push(("DirectML", dml.build()));
                break;
            }
        }
    }

    #[cfg(feature = "onednn")]
    providers.push(("oneDNN", OneDNNExecutionProvider::default().build()));

    providers
}

fn cpu_session(h: &ModelHandle, num_threads: usize) -> Result<Session> {
    Ok(SessionBuilder::new()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(num_threads)?
        .with_inter_threads(num_threads)?
        .with_parallel_execution(true)?
        .commit_from_file(&h.local_path)?)
}

/// Create the global inference session. Later calls are no-ops.
#[cfg(not(feature = "engine-mock"))]
pub fn preload(h: &ModelHandle) -> Result<()> {
    if SESSION.get().is_some() {
        return Ok(());
    }

    ORT_INIT.get_or_try_init::<_, StemError>(|| {
        ort::init().commit().map_err(StemError::from)?;
        Ok(())
    })?;

    let num_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let providers = get_execution_providers();

    let session = if providers.is_empty() {
        tracing::info!(threads = num_threads, "using CPU execution");
        cpu_session(h, num_threads)?
    } else {
        let names: Vec<&str> = providers.iter().map(|(n, _)| *n).collect();
        tracing::info!(providers = ?names, "trying execution providers (CPU fallback)");

        let accelerated = (|| -> std::result::Result<Session, ort::Error> {
            SessionBuilder::new()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_execution_providers(providers.into_iter().map(|(_, p)| p).collect::<Vec<_>>())?
                .with_intra_threads(num_threads)?
                .with_inter_threads(num_threads)?
                .commit_from_file(&h.local_path)
        })();

        match accelerated {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, threads = num_threads, "execution providers failed, falling back to CPU");
                cpu_session(h, num_threads)?
            }
        }
    };

    SESSION.set(Mutex::new(session)).ok();
    MANIFEST.set(h.manifest.clone()).ok();
    tracing::info!(model = %h.manifest.name, path = %h.local_path.display(), "model loaded");
    Ok(())
}

#[cfg(not(feature = "engine-mock"))]
pub fn manifest() -> Result<&'static ModelManifest> {
    MANIFEST
        .get()
        .ok_or_else(|| anyhow!("engine::preload() must be called before using the engine").into())
}

/// Run one HTDemucs window. Returns `[sources, 2, T]`.
#[cfg(not(feature = "engine-mock"))]
pub fn run_window_demucs(left: &[f32], right: &[f32]) -> Result<Array3<f32>> {
    if left.len() != right.len() {
        return Err(anyhow!("L/R length mismatch").into());
    }
    let t = left.len();
    if t != DEMUCS_T {
        return Err(anyhow!("Bad window length {} (expected {})", t, DEMUCS_T).into());
    }

    // Time branch [1, 2, T], planar.
    let mut planar = Vec::with_capacity(2 * t);
    planar.extend_from_slice(left);
    planar.extend_from_slice(right);
    let time_value: Value = Tensor::from_array((vec![1, 2, t], planar))?.into_dyn();

    // Spectral branch [1, 4, F, Frames].
    let (spec_cac, f_bins, frames) = stft_cac_stereo_centered(left, right, DEMUCS_NFFT, DEMUCS_HOP);
    if f_bins != DEMUCS_F || frames != DEMUCS_FRAMES {
        return Err(anyhow!(
            "Spec dims mismatch: got F={},Frames={}, expected F={},Frames={}",
            f_bins,
            frames,
            DEMUCS_F,
            DEMUCS_FRAMES
        )
        .into());
    }
    let spec_value: Value = Tensor::from_array((vec![1, 4, f_bins, frames], spec_cac))?.into_dyn();

    let mut session = SESSION
        .get()
        .ok_or_else(|| anyhow!("engine::preload() must be called before inference"))?
        .lock()
        .map_err(|_| anyhow!("inference session poisoned"))?;

    let input_name = |wanted: &str| -> Result<String> {
        session
            .inputs
            .iter()
            .find(|i| i.name == wanted)
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("Model missing input '{}'", wanted).into())
    };
    let in_time = input_name("input")?;
    let in_spec = input_name("x")?;

    let outputs = session.run(vec![(in_time, time_value), (in_spec, spec_value)])?;

    // "output": spectral branch [1, S, 4, F, Frames]; "add_67": time branch [1, S, 2, T].
    let mut output_freq: Option<Value> = None;
    let mut output_time: Option<Value> = None;
    for (name, val) in outputs.into_iter() {
        if name == "output" {
            output_freq = Some(val);
        } else if name == "add_67" {
            output_time = Some(val);
        }
    }

    let out_freq =
        output_freq.ok_or_else(|| anyhow!("Model did not return 'output' (freq domain)"))?;
    let out_time =
        output_time.ok_or_else(|| anyhow!("Model did not return 'add_67' (time domain)"))?;

    let (shape_time, data_time) = out_time.try_extract_tensor::<f32>()?;
    let num_sources = shape_time[1] as usize;
    let (shape_freq, data_freq) = out_freq.try_extract_tensor::<f32>()?;

    if shape_freq.len() != 5
        || shape_freq[0] != 1
        || shape_freq[1] != num_sources as i64
        || shape_freq[2] != 4
        || shape_freq[3] != f_bins as i64
        || shape_freq[4] != frames as i64
    {
        return Err(anyhow!(
            "Unexpected freq output shape: {:?}, expected [1, {}, 4, {}, {}]",
            shape_freq,
            num_sources,
            f_bins,
            frames
        )
        .into());
    }
    if data_time.len() < num_sources * 2 * t {
        return Err(anyhow!("Time output too short: {} values", data_time.len()).into());
    }

    let plane = 4 * f_bins * frames;
    let source_specs: Vec<&[f32]> = (0..num_sources)
        .map(|src| &data_freq[src * plane..(src + 1) * plane])
        .collect();

    let istft_results =
        istft_cac_stereo_parallel(&source_specs, f_bins, frames, DEMUCS_NFFT, DEMUCS_HOP, t);

    let mut result = Vec::with_capacity(num_sources * 2 * t);
    for (src, (left_freq, right_freq)) in istft_results.into_iter().enumerate() {
        let base = src * 2 * t;
        let left_time = &data_time[base..base + t];
        let right_time = &data_time[base + t..base + 2 * t];

        result.extend(left_time.iter().zip(&left_freq).map(|(a, b)| a + b));
        result.extend(right_time.iter().zip(&right_freq).map(|(a, b)| a + b));
    }

    if tracing::enabled!(tracing::Level::TRACE) {
        let peak = result.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        tracing::trace!(peak, sources = num_sources, "window inferred");
    }

    Ok(Array3::from_shape_vec((num_sources, 2, t), result)?)
}

#[cfg(feature = "engine-mock")]
mod _engine_mock {
    use super::*;

    static MANIFEST: OnceCell<ModelManifest> = OnceCell::new();

    pub fn preload(h: &ModelHandle) -> Result<()> {
        MANIFEST.set(h.manifest.clone()).ok();
        Ok(())
    }

    pub fn manifest() -> Result<&'static ModelManifest> {
        MANIFEST
            .get()
            .ok_or_else(|| anyhow!("preload first (mock)").into())
    }

    /// Four sources, each a quarter of the input, so any full mix restores it.
    pub fn run_window_demucs(left: &[f32], right: &[f32]) -> Result<Array3<f32>> {
        let t = left.len().min(right.len());
        let sources = 4usize;
        let mut out = vec![0.0f32; sources * 2 * t];
        for s in 0..sources {
            for i in 0..t {
                out[s * 2 * t + i] = left[i] * 0.25;
                out[s * 2 * t + t + i] = right[i] * 0.25;
            }
        }
        Ok(Array3::from_shape_vec((sources, 2, t), out)?)
    }
}

#[cfg(feature = "engine-mock")]
pub use _engine_mock::{manifest, preload, run_window_demucs};
