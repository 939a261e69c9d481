//! Encoding and uploading separated stems, with bounded exponential-backoff retry.

use crate::{
    config::{PublishOptions, DEFAULT_KEY_PREFIX},
    core::{
        audio::probe_sample_rate,
        splitter::{save_stems, Separator},
    },
    encode::encode_stem,
    error::{Result, StemError},
    io::progress::{emit_split_progress, SplitProgress},
    storage::{object_key, ObjectStore},
    types::{AudioData, OutputFormat, PublishReport, StemUpload},
};

use indexmap::IndexMap;
use std::{path::Path, thread, time::Duration};
use uuid::Uuid;

/// `{stem}_{uuid}_{input file stem}.{ext}`
pub fn stem_filename(stem: &str, input_path: &Path, format: OutputFormat) -> String {
    let base = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    format!("{stem}_{}_{base}.{}", Uuid::new_v4().simple(), format.extension())
}

type Sleeper<'a> = Box<dyn FnMut(Duration) + 'a>;

/// Uploads stems to an [`ObjectStore`] one at a time.
pub struct Publisher<'a, S: ObjectStore> {
    store: S,
    opts: &'a PublishOptions,
    key_prefix: String,
    sleep: Sleeper<'a>,
}

impl<'a, S: ObjectStore> Publisher<'a, S> {
    pub fn new(store: S, opts: &'a PublishOptions) -> Self {
        Self {
            store,
            opts,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            sleep: Box::new(thread::sleep),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Replace the backoff sleep, e.g. to record delays instead of waiting.
    pub fn with_sleeper(mut self, sleep: impl FnMut(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// Encode and upload one stem, retrying the whole attempt on any failure.
    pub fn upload_stem(&mut self, stem: &str, audio: &AudioData, input_path: &Path) -> Result<StemUpload> {
        let format = self.opts.format;
        let max_attempts = self.opts.retry.max_attempts.max(1);
        let mut encoded: Option<Vec<u8>> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            emit_split_progress(SplitProgress::Uploading {
                stem: stem.to_string(),
                attempt,
            });

            let result = (|| -> Result<StemUpload> {
                let body = match &encoded {
                    Some(bytes) => bytes.clone(),
                    None => {
                        let bytes = encode_stem(audio, format)?;
                        encoded = Some(bytes.clone());
                        bytes
                    }
                };
                let filename = stem_filename(stem, input_path, format);
                let key = object_key(&self.key_prefix, &filename);
                let url = self.store.put(&key, body, format.content_type())?;
                Ok(StemUpload {
                    stem: stem.to_string(),
                    key,
                    url,
                    attempts: attempt,
                })
            })();

            match result {
                Ok(upload) => {
                    tracing::info!(stem, url = %upload.url, attempts = attempt, "uploaded stem");
                    return Ok(upload);
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(stem, attempts = attempt, error = %e, "giving up on stem");
                    return Err(StemError::RetriesExhausted {
                        stem: stem.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.opts.retry.delay_after(attempt);
                    tracing::warn!(stem, attempt, error = %e, ?delay, "upload failed, retrying");
                    (self.sleep)(delay);
                }
            }
        }
    }

    /// Upload every stem in order; the first stem that exhausts its retries aborts the run.
    pub fn publish(
        &mut self,
        stems: &[(String, AudioData)],
        input_path: &Path,
        original_sample_rate: u32,
    ) -> Result<PublishReport> {
        emit_split_progress(SplitProgress::Stage("upload"));
        let mut urls = IndexMap::new();
        for (name, audio) in stems {
            let upload = self.upload_stem(name, audio, input_path)?;
            urls.insert(upload.stem, upload.url);
        }

        tracing::info!(count = urls.len(), "all stems uploaded");
        Ok(PublishReport {
            stems: urls,
            original_sample_rate,
            output_format: self.opts.format,
        })
    }
}

/// Separate `input` and publish the stems selected by `opts.mode`.
/// With `opts.save_dir` set, the stems are also written there as WAV first.
pub fn separate_and_publish<S: ObjectStore>(
    input: impl AsRef<Path>,
    opts: &PublishOptions,
    key_prefix: &str,
    store: S,
) -> Result<PublishReport> {
    let input = input.as_ref();
    let original_sample_rate = probe_sample_rate(input);
    tracing::info!(input = %input.display(), original_sample_rate, "separating");

    let separated = Separator::separate(input, &opts.split)?;
    let stems = separated.stems_for(opts.mode);

    if let Some(dir) = &opts.save_dir {
        save_stems(&stems, dir)?;
    }

    Publisher::new(store, opts)
        .with_key_prefix(key_prefix)
        .publish(&stems, input, original_sample_rate)
}
