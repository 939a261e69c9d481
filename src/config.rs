//! Runtime configuration: storage credentials, retry policy and publish options.

use crate::{
    error::{Result, StemError},
    types::{OutputFormat, SplitMode, SplitOptions},
};

use std::{path::PathBuf, time::Duration};

pub const DEFAULT_KEY_PREFIX: &str = "stems";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Where and how stems are stored.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// S3-compatible endpoint (MinIO, R2, ...). `None` means AWS.
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub key_prefix: String,
    pub public_read: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("key_prefix", &self.key_prefix)
            .field("public_read", &self.public_read)
            .finish()
    }
}

impl StorageConfig {
    /// Read from the process environment, loading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "ignoring unreadable .env"),
        }
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |k: &str| get(k).ok_or_else(|| StemError::Config(format!("{k} is not set")));

        let bucket = require("AWS_BUCKET_NAME")?;
        let region = get("AWS_DEFAULT_REGION")
            .or_else(|| get("AWS_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = get("AWS_ENDPOINT_URL_S3")
            .or_else(|| get("AWS_ENDPOINT_URL"))
            .map(|e| e.trim_end_matches('/').to_string());
        let key_prefix = get("STEMS_KEY_PREFIX")
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
        let public_read = get("STEMS_PUBLIC_READ")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            bucket,
            region,
            endpoint,
            access_key_id: require("AWS_ACCESS_KEY_ID")?,
            secret_access_key: require("AWS_SECRET_ACCESS_KEY")?,
            session_token: get("AWS_SESSION_TOKEN"),
            key_prefix,
            public_read,
        })
    }
}

/// Bounded exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Pause after the `failed_attempts`-th failure: `base * 2^n`, capped at `max_delay`.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempts.min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Everything a publish run needs besides the input file and the store.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    pub format: OutputFormat,
    pub mode: SplitMode,
    pub retry: RetryPolicy,
    pub split: SplitOptions,
    /// Also keep a local WAV copy of every published stem here.
    pub save_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const CREDS: [(&str, &str); 3] = [
        ("AWS_BUCKET_NAME", "my-bucket"),
        ("AWS_ACCESS_KEY_ID", "AKID"),
        ("AWS_SECRET_ACCESS_KEY", "secret"),
    ];

    #[test]
    fn defaults_from_minimal_env() {
        let cfg = StorageConfig::from_lookup(lookup(&CREDS)).unwrap();
        assert_eq!(cfg.bucket, "my-bucket");
        assert_eq!(cfg.region, DEFAULT_REGION);
        assert_eq!(cfg.key_prefix, "stems");
        assert!(cfg.public_read);
        assert!(cfg.endpoint.is_none());
        assert!(cfg.session_token.is_none());
    }

    #[test]
    fn overrides_are_honoured() {
        let mut pairs = CREDS.to_vec();
        pairs.extend([
            ("AWS_REGION", "eu-west-1"),
            ("AWS_DEFAULT_REGION", "eu-central-1"),
            ("AWS_ENDPOINT_URL", "http://localhost:9000/"),
            ("STEMS_KEY_PREFIX", "/out/stems/"),
            ("STEMS_PUBLIC_READ", "false"),
            ("AWS_SESSION_TOKEN", "tok"),
        ]);
        let cfg = StorageConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.region, "eu-central-1");
        assert_eq!(cfg.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(cfg.key_prefix, "out/stems");
        assert!(!cfg.public_read);
        assert_eq!(cfg.session_token.as_deref(), Some("tok"));
    }

    #[test]
    fn missing_bucket_names_the_variable() {
        let err = StorageConfig::from_lookup(lookup(&CREDS[1..])).unwrap_err();
        assert!(err.to_string().contains("AWS_BUCKET_NAME"));

        let mut pairs = CREDS.to_vec();
        pairs[2] = ("AWS_SECRET_ACCESS_KEY", "   ");
        let err = StorageConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = StorageConfig::from_lookup(lookup(&CREDS)).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("secret\""));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn backoff_doubles_from_two_seconds() {
        let p = RetryPolicy::default();
        let secs: Vec<u64> = (1..5).map(|n| p.delay_after(n).as_secs()).collect();
        assert_eq!(secs, [2, 4, 8, 16]);
        assert_eq!(p.delay_after(10), Duration::from_secs(60));
        assert_eq!(p.delay_after(u32::MAX), Duration::from_secs(60));
        assert_eq!(RetryPolicy::immediate(3).delay_after(4), Duration::ZERO);
    }
}
