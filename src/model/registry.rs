use crate::error::{Result, StemError};

/// Known model names and where their manifests live.
const REGISTRY: &[(&str, &str)] = &[(
    "htdemucs_ort_v1",
    "https://huggingface.co/gentij/htdemucs-ort/resolve/main/manifest.json",
)];

pub fn resolve_manifest_url(model_name: &str) -> Result<String> {
    REGISTRY
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(model_name))
        .map(|(_, url)| url.to_string())
        .ok_or_else(|| {
            let known: Vec<&str> = REGISTRY.iter().map(|(n, _)| *n).collect();
            StemError::Manifest(format!(
                "unknown model '{model_name}' (known: {})",
                known.join(", ")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_resolves() {
        let url = resolve_manifest_url("htdemucs_ort_v1").unwrap();
        assert!(url.ends_with("manifest.json"));
    }

    #[test]
    fn unknown_model_is_manifest_error() {
        match resolve_manifest_url("nope") {
            Err(StemError::Manifest(msg)) => assert!(msg.contains("htdemucs_ort_v1")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
