use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

/// Progress events emitted while separating and publishing a file.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitProgress {
    Stage(&'static str),
    Chunks {
        done: usize,
        total: usize,
        percent: f32,
    },
    Writing {
        stem: String,
        done: usize,
        total: usize,
        percent: f32,
    },
    Uploading {
        stem: String,
        attempt: u32,
    },
    Finished,
}

type DownloadCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;
type SplitCallback = Arc<dyn Fn(SplitProgress) + Send + Sync>;

static DOWNLOAD_CB: Lazy<RwLock<Option<DownloadCallback>>> = Lazy::new(|| RwLock::new(None));
static SPLIT_CB: Lazy<RwLock<Option<SplitCallback>>> = Lazy::new(|| RwLock::new(None));

/// Install a callback receiving `(downloaded, total)` bytes for model downloads.
/// `total` is 0 when the server did not announce a length.
pub fn set_download_progress_callback<F>(f: F)
where
    F: Fn(u64, u64) + Send + Sync + 'static,
{
    if let Ok(mut slot) = DOWNLOAD_CB.write() {
        *slot = Some(Arc::new(f));
    }
}

pub fn set_split_progress_callback<F>(f: F)
where
    F: Fn(SplitProgress) + Send + Sync + 'static,
{
    if let Ok(mut slot) = SPLIT_CB.write() {
        *slot = Some(Arc::new(f));
    }
}

// Callbacks run after the lock is released so they may replace themselves.
pub(crate) fn emit_download_progress(done: u64, total: u64) {
    let cb = DOWNLOAD_CB.read().ok().and_then(|slot| slot.clone());
    if let Some(cb) = cb {
        cb(done, total);
    }
}

pub(crate) fn emit_split_progress(p: SplitProgress) {
    tracing::trace!(progress = ?p, "split progress");
    let cb = SPLIT_CB.read().ok().and_then(|slot| slot.clone());
    if let Some(cb) = cb {
        cb(p);
    }
}
