//! Object storage: an [`ObjectStore`] seam plus an S3 implementation signed with SigV4.

use crate::{
    config::StorageConfig,
    error::{Result, StemError},
    io::{
        crypto::{hmac_sha256, sha256_hex},
        net::http_client,
    },
};

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{blocking::Client, Url};
use uuid::Uuid;

/// RFC 3986 unreserved characters stay literal; `/` separates key segments.
const KEY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Anything that can store a blob under a key and hand back its public URL.
pub trait ObjectStore {
    fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
    fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        (**self).put(key, body, content_type)
    }
}

/// `{prefix}/{uuid}_{filename}`, or `{uuid}_{filename}` without a prefix.
pub fn object_key(prefix: &str, filename: &str) -> String {
    let id = Uuid::new_v4().simple();
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{id}_{filename}")
    } else {
        format!("{prefix}/{id}_{filename}")
    }
}

pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE).to_string()
}

/// Computes AWS Signature Version 4 `Authorization` headers.
pub struct SigV4Signer<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

impl SigV4Signer<'_> {
    /// `headers` must include `host`, `x-amz-date` and `x-amz-content-sha256`.
    /// Names are lowercased and sorted before signing.
    pub fn authorization(
        &self,
        method: &str,
        canonical_uri: &str,
        headers: &[(&str, &str)],
        payload_sha256: &str,
        now: DateTime<Utc>,
    ) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let mut canon: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        canon.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_headers: String = canon.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
        let signed_headers = canon
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_sha256}"
        );
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac_sha256(format!("AWS4{}", self.secret_access_key).as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key_id
        )
    }
}

/// S3 (or S3-compatible) bucket reached over plain HTTPS PUTs.
pub struct S3Store {
    cfg: StorageConfig,
    client: Client,
}

impl S3Store {
    pub fn new(cfg: StorageConfig) -> Self {
        Self {
            cfg,
            client: http_client(),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.cfg
    }

    /// Request URL for `key`: virtual-hosted style on AWS, path style on custom endpoints.
    pub fn object_url(&self, key: &str) -> String {
        let key = encode_key(key);
        match &self.cfg.endpoint {
            Some(endpoint) => format!("{endpoint}/{}/{key}", self.cfg.bucket),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{key}",
                self.cfg.bucket, self.cfg.region
            ),
        }
    }
}

impl ObjectStore for S3Store {
    fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        let url_str = self.object_url(key);
        let url = Url::parse(&url_str)
            .map_err(|e| StemError::Config(format!("invalid object URL '{url_str}': {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(StemError::Config(format!("object URL '{url_str}' has no host"))),
        };

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = sha256_hex(&body);

        let mut headers: Vec<(&str, &str)> = vec![
            ("content-type", content_type),
            ("host", host.as_str()),
            ("x-amz-content-sha256", payload_hash.as_str()),
            ("x-amz-date", amz_date.as_str()),
        ];
        if self.cfg.public_read {
            headers.push(("x-amz-acl", "public-read"));
        }
        if let Some(token) = self.cfg.session_token.as_deref() {
            headers.push(("x-amz-security-token", token));
        }

        let signer = SigV4Signer {
            access_key_id: &self.cfg.access_key_id,
            secret_access_key: &self.cfg.secret_access_key,
            region: &self.cfg.region,
            service: "s3",
        };
        let authorization = signer.authorization("PUT", url.path(), &headers, &payload_hash, now);

        let mut req = self.client.put(url.clone()).header("authorization", authorization);
        for (k, v) in headers.iter().filter(|(k, _)| *k != "host") {
            req = req.header(*k, *v);
        }

        tracing::debug!(%key, bytes = body.len(), "PUT object");
        let resp = req.body(body).send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(StemError::Upload {
                key: key.to_string(),
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        Ok(url_str)
    }
}
