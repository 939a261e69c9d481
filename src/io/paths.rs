use crate::error::{Result, StemError};

use directories::ProjectDirs;
use std::path::PathBuf;

pub const CACHE_DIR_ENV: &str = "STEM_SPLITTER_CACHE_DIR";

/// Directory where downloaded model artifacts are cached.
pub fn models_cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir).join("models"));
        }
    }

    let dirs = ProjectDirs::from("dev", "stem-splitter", "stem-splitter-cloud")
        .ok_or_else(|| StemError::Config("could not determine a home directory for the model cache".into()))?;
    Ok(dirs.cache_dir().join("models"))
}
