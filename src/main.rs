use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use stem_splitter_cloud::{
    logging::init_tracing, separate_and_publish, OutputFormat, PublishOptions, RetryPolicy,
    S3Store, SplitMode, SplitOptions, SplitProgress, StemError, StorageConfig,
};

#[derive(Parser)]
#[command(version, author)]
#[command(about = "Split a song into stems and upload them to S3", long_about = None)]
struct Cli {
    #[arg(help = "Input audio file path")]
    #[arg(value_name = "INPUT")]
    input_path: PathBuf,

    #[arg(short, long, help = "Stem file format (wav/mp3)")]
    #[arg(value_name = "FORMAT", default_value = "mp3")]
    format: OutputFormat,

    #[arg(short, long, help = "2 for vocals/instrumental, 4 for vocals/drums/bass/other")]
    #[arg(value_name = "MODE", default_value = "2")]
    mode: SplitMode,

    #[arg(long, help = "Registered model name", default_value = "htdemucs_ort_v1")]
    model: String,

    #[arg(long, help = "Fetch the model manifest from this URL instead")]
    manifest_url: Option<String>,

    #[arg(long, help = "Use a local ONNX model file, skipping the download")]
    model_path: Option<PathBuf>,

    #[arg(long, help = "Upload attempts per stem", default_value_t = 5)]
    max_attempts: u32,

    #[arg(long, help = "Bucket (overrides AWS_BUCKET_NAME)")]
    bucket: Option<String>,

    #[arg(long, help = "Region (overrides AWS_DEFAULT_REGION)")]
    region: Option<String>,

    #[arg(long, help = "S3-compatible endpoint URL")]
    endpoint: Option<String>,

    #[arg(long, help = "Also write the published stems as WAV into this directory")]
    save_dir: Option<PathBuf>,

    #[arg(short, action = clap::ArgAction::Count, help = "More logging (-v debug, -vv trace)")]
    verbose: u8,
}

fn storage_config(args: &Cli) -> Result<StorageConfig, StemError> {
    let mut cfg = StorageConfig::from_env()?;
    if let Some(bucket) = &args.bucket {
        cfg.bucket = bucket.clone();
    }
    if let Some(region) = &args.region {
        cfg.region = region.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        cfg.endpoint = Some(endpoint.trim_end_matches('/').to_string());
    }
    Ok(cfg)
}

fn run(args: Cli) -> Result<String, StemError> {
    if !args.input_path.is_file() {
        return Err(StemError::Config(format!(
            "input {} is not a regular file",
            args.input_path.display()
        )));
    }

    let cfg = storage_config(&args)?;
    let key_prefix = cfg.key_prefix.clone();

    let opts = PublishOptions {
        format: args.format,
        mode: args.mode,
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            ..RetryPolicy::default()
        },
        split: SplitOptions {
            model_name: args.model,
            manifest_url_override: args.manifest_url,
            model_path: args.model_path.map(|p| p.to_string_lossy().into_owned()),
        },
        save_dir: args.save_dir,
    };

    let report = separate_and_publish(&args.input_path, &opts, &key_prefix, S3Store::new(cfg))?;
    Ok(report.to_json()?)
}

fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing(args.verbose);

    stem_splitter_cloud::set_download_progress_callback(|done, total| {
        if total > 0 && (done == total || done % (8 << 20) < 256 * 1024) {
            tracing::info!(done, total, "model download");
        }
    });
    stem_splitter_cloud::set_split_progress_callback(|p| match p {
        SplitProgress::Stage(s) => tracing::info!(stage = s, "stage"),
        SplitProgress::Chunks { done, total, percent } => {
            tracing::info!(done, total, "separating {:.0}%", percent)
        }
        SplitProgress::Writing { stem, done, total, .. } => {
            tracing::debug!(%stem, done, total, "wrote stem")
        }
        SplitProgress::Uploading { stem, attempt } if attempt > 1 => {
            tracing::info!(%stem, attempt, "retrying upload")
        }
        _ => {}
    });

    match run(args) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "failed to process file");
            ExitCode::FAILURE
        }
    }
}
