use thiserror::Error;

pub type Result<T> = std::result::Result<T, StemError>;

#[derive(Debug, Error)]
pub enum StemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("checksum mismatch for {path}")]
    Checksum { path: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("upload of '{key}' failed with status {status}: {body}")]
    Upload {
        key: String,
        status: u16,
        body: String,
    },

    #[error("Failed to upload {stem} after {attempts} attempts: {last}")]
    RetriesExhausted {
        stem: String,
        attempts: u32,
        last: Box<StemError>,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<symphonia::core::errors::Error> for StemError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        StemError::Decode(e.to_string())
    }
}

impl From<hound::Error> for StemError {
    fn from(e: hound::Error) -> Self {
        StemError::Encode(e.to_string())
    }
}

impl From<rubato::ResampleError> for StemError {
    fn from(e: rubato::ResampleError) -> Self {
        StemError::Resample(e.to_string())
    }
}

impl From<rubato::ResamplerConstructionError> for StemError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        StemError::Resample(e.to_string())
    }
}
