use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use std::{fmt, str::FromStr};

#[derive(Clone, Debug, PartialEq)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Which set of stems gets published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMode {
    /// Vocals plus an instrumental mix of everything else.
    TwoStems,
    /// Vocals, drums, bass and other.
    FourStems,
}

impl Default for SplitMode {
    fn default() -> Self {
        SplitMode::TwoStems
    }
}

impl FromStr for SplitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2" | "two" => Ok(SplitMode::TwoStems),
            "4" | "four" => Ok(SplitMode::FourStems),
            other => Err(format!("unknown split mode '{other}' (expected 2 or 4)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    Mp3,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "audio/wav",
            OutputFormat::Mp3 => "audio/mpeg",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Mp3
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(OutputFormat::Wav),
            "mp3" => Ok(OutputFormat::Mp3),
            other => Err(format!("unknown output format '{other}' (expected wav or mp3)")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitOptions {
    pub model_name: String,
    pub manifest_url_override: Option<String>,
    /// Custom local path to the ONNX model file.
    /// If set, skips downloading and uses this file directly.
    #[serde(default)]
    pub model_path: Option<String>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            model_name: "htdemucs_ort_v1".into(),
            manifest_url_override: None,
            model_path: None,
        }
    }
}

/// One successfully uploaded stem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StemUpload {
    pub stem: String,
    pub key: String,
    pub url: String,
    pub attempts: u32,
}

/// Final result of a publish run, serialised as the tool's JSON output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    /// Stem name to public URL, in upload order.
    pub stems: IndexMap<String, String>,
    pub original_sample_rate: u32,
    pub output_format: OutputFormat,
}

impl PublishReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Artifact {
    pub file: String,
    pub sha256: String,
    #[serde(alias = "size")]
    pub size_bytes: u64,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IODesc {
    pub name: String,
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub dtype: String,
    #[serde(default)]
    pub shape: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub opset: Option<u32>,

    #[serde(alias = "sample_rate_hz")]
    pub sample_rate: u32,
    pub window: usize,
    pub hop: usize,

    #[serde(default)]
    pub stems: Vec<String>,

    #[serde(default)]
    pub inputs: Vec<IODesc>,
    #[serde(default)]
    pub outputs: Vec<IODesc>,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub entry: String,

    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub filesize: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub file: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub url: String,
}

impl From<&Artifact> for ResolvedArtifact {
    fn from(a: &Artifact) -> Self {
        ResolvedArtifact {
            file: a.file.clone(),
            sha256: a.sha256.clone(),
            size_bytes: a.size_bytes,
            url: a.url.clone(),
        }
    }
}

impl ModelManifest {
    /// Default manifest for a locally supplied HTDemucs export.
    pub fn htdemucs_default(name: &str) -> Self {
        ModelManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            backend: "onnx".to_string(),
            format: "onnx".to_string(),
            opset: Some(17),
            sample_rate: 44100,
            window: 343_980,
            hop: 171_990,
            stems: vec!["drums".into(), "bass".into(), "other".into(), "vocals".into()],
            inputs: vec![],
            outputs: vec![],
            artifacts: vec![],
            entry: String::new(),
            url: String::new(),
            sha256: String::new(),
            filesize: 0,
        }
    }

    pub fn resolve_primary_artifact(&self) -> Result<ResolvedArtifact, String> {
        if !self.artifacts.is_empty() {
            if !self.entry.is_empty() {
                return self
                    .artifacts
                    .iter()
                    .find(|a| a.file == self.entry)
                    .map(ResolvedArtifact::from)
                    .ok_or_else(|| format!("entry '{}' not found in artifacts[]", self.entry));
            }
            if self.artifacts.len() == 1 {
                return Ok(ResolvedArtifact::from(&self.artifacts[0]));
            }
            return Err("multiple artifacts present but no 'entry' specified".into());
        }

        if self.url.is_empty() || self.sha256.len() < 8 || self.filesize == 0 {
            return Err("manifest missing artifacts and legacy url/sha256/filesize".into());
        }
        let file = infer_filename_from_url(&self.url)
            .unwrap_or_else(|| format!("{}-{}.bin", self.name, &self.sha256[..8]));
        Ok(ResolvedArtifact {
            file,
            sha256: self.sha256.clone(),
            size_bytes: self.filesize,
            url: self.url.clone(),
        })
    }
}

fn infer_filename_from_url(url: &str) -> Option<String> {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
