use crate::{
    error::{Result, StemError},
    io::{
        crypto::verify_sha256,
        net::{download_with_progress, http_client},
        paths::models_cache_dir,
    },
    model::registry::resolve_manifest_url,
    types::{ModelManifest, SplitOptions},
};

use std::{fs, path::PathBuf};

pub struct ModelHandle {
    pub manifest: ModelManifest,
    pub local_path: PathBuf,
}

/// Load a model from a custom local path with the default HTDemucs manifest.
pub fn load_model_from_path(model_path: &str) -> Result<ModelHandle> {
    let path = PathBuf::from(model_path);
    if !path.is_file() {
        return Err(StemError::Manifest(format!("Model file not found: {model_path}")));
    }

    Ok(ModelHandle {
        manifest: ModelManifest::htdemucs_default("htdemucs_custom"),
        local_path: path,
    })
}

/// Resolve the model named in `opts`, preferring an explicit local path.
pub fn resolve_model(opts: &SplitOptions) -> Result<ModelHandle> {
    match opts.model_path.as_deref() {
        Some(path) => load_model_from_path(path),
        None => ensure_model(&opts.model_name, opts.manifest_url_override.as_deref()),
    }
}

/// Fetch the manifest and make sure the primary artifact sits verified in the cache.
pub fn ensure_model(model_name: &str, manifest_url_override: Option<&str>) -> Result<ModelHandle> {
    let manifest_url = match manifest_url_override {
        Some(url) => url.to_string(),
        None => resolve_manifest_url(model_name)?,
    };

    let client = http_client();
    tracing::debug!(%manifest_url, "fetching model manifest");
    let manifest: ModelManifest = client
        .get(&manifest_url)
        .send()?
        .error_for_status()?
        .json()?;

    let a = manifest
        .resolve_primary_artifact()
        .map_err(StemError::Manifest)?;
    if a.sha256.len() < 8 {
        return Err(StemError::Manifest(format!(
            "artifact '{}' has no usable sha256",
            a.file
        )));
    }

    let cache_dir = models_cache_dir()?;
    fs::create_dir_all(&cache_dir)?;
    let ext = a
        .file
        .rsplit_once('.')
        .map(|(_, e)| format!(".{e}"))
        .unwrap_or_default();
    let file_name = format!("{}-{}{}", manifest.name, &a.sha256[..8], ext);
    let local_path = cache_dir.join(file_name);

    let need_download = !matches!(verify_sha256(&local_path, &a.sha256), Ok(true));
    if need_download {
        download_with_progress(&client, &a.url, &local_path)?;
        if !verify_sha256(&local_path, &a.sha256)? {
            let _ = fs::remove_file(&local_path);
            return Err(StemError::Checksum {
                path: local_path.display().to_string(),
            });
        }
        if a.size_bytes > 0 {
            let size = fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
            if size != a.size_bytes {
                tracing::warn!(
                    path = %local_path.display(),
                    expected = a.size_bytes,
                    actual = size,
                    "model size mismatch"
                );
            }
        }
    } else {
        tracing::debug!(path = %local_path.display(), "using cached model");
    }

    Ok(ModelHandle {
        manifest,
        local_path,
    })
}
