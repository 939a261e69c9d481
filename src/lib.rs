//! Split audio into stems with a pretrained HTDemucs model and publish them
//! to S3-compatible object storage.
//!
//! ```no_run
//! use stem_splitter_cloud::{separate_and_publish, PublishOptions, S3Store, StorageConfig};
//!
//! let cfg = StorageConfig::from_env()?;
//! let prefix = cfg.key_prefix.clone();
//! let report = separate_and_publish("song.mp3", &PublishOptions::default(), &prefix, S3Store::new(cfg))?;
//! println!("{}", report.to_json()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
mod types;

pub mod config;
pub mod encode;
pub mod logging;
pub mod publish;
pub mod storage;

pub mod core {
    pub mod audio;
    pub mod dsp;
    pub mod engine;
    pub mod splitter;
}

pub mod model {
    pub mod model_manager;
    pub mod registry;
}

pub mod io {
    pub mod crypto;
    pub mod ffmpeg;
    pub mod net;
    pub mod paths;
    pub mod progress;
}

pub use crate::config::{PublishOptions, RetryPolicy, StorageConfig};
pub use crate::core::splitter::{SeparatedStems, Separator, Stem};
pub use crate::error::{Result, StemError};
pub use crate::io::progress::{
    set_download_progress_callback, set_split_progress_callback, SplitProgress,
};
pub use crate::model::model_manager::{ensure_model, load_model_from_path, ModelHandle};
pub use crate::publish::{separate_and_publish, Publisher};
pub use crate::storage::{ObjectStore, S3Store};
pub use crate::types::{
    AudioData, ModelManifest, OutputFormat, PublishReport, SplitMode, SplitOptions, StemUpload,
};

/// Download (if needed) and load the model so the first split doesn't pay for it.
pub fn prepare_model(opts: &SplitOptions) -> Result<()> {
    let handle = crate::model::model_manager::resolve_model(opts)?;
    crate::core::engine::preload(&handle)?;
    Ok(())
}
