//! Content-addressed identities for submissions.
//!
//! The fingerprint binds the sanitized image bytes; the idempotency key
//! binds the fingerprint to the pipeline configuration. Both must be stable
//! across runs: the fingerprint hashes the re-encoded PNG payload produced
//! by intake, and the key hashes a canonical JSON rendering of the config
//! with sorted keys and fixed numeric precision.

use sha2::{Digest, Sha256};

use crate::config::PipelineConfig;

/// 256-bit hash of the sanitized image bytes, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ImageFingerprint(pub String);

impl ImageFingerprint {
    pub fn compute(sanitized_bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(sanitized_bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 16 hex chars identifying one (image, config) execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    /// Derive the key from a fingerprint and a pipeline configuration.
    ///
    /// Semantically equal configs always yield byte-equal hash input: the
    /// canonical JSON sorts keys and pins float precision, so field order
    /// and float formatting cannot perturb the digest.
    pub fn derive(fingerprint: &ImageFingerprint, config: &PipelineConfig) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_str().as_bytes());
        hasher.update(canonical_config_json(config).as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lock_key(&self) -> String {
        format!("{}:lock", self.0)
    }

    pub fn result_key(&self) -> String {
        format!("{}:result", self.0)
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical JSON rendering of a [`PipelineConfig`].
///
/// serde_json maps are BTree-backed, so object keys come out sorted. The
/// only float in the config is rendered as a fixed four-decimal string to
/// keep the representation precision-independent.
pub fn canonical_config_json(config: &PipelineConfig) -> String {
    let value = serde_json::json!({
        "always_verify_catalogue": config.always_verify_catalogue,
        "catalogue_snapshot": config.catalogue_snapshot,
        "engine": config.engine,
        "fuzzy_top_k": config.fuzzy_top_k,
        "languages": config.languages,
        "min_quantity_lines": config.min_quantity_lines,
        "min_span_confidence": format!("{:.4}", config.min_span_confidence),
        "preprocess": {
            "binarize": config.preprocess.binarize,
            "denoise": config.preprocess.denoise,
            "sharpen": config.preprocess.sharpen,
            "superres": config.preprocess.superres,
        },
        "vision_fallback_enabled": config.vision_fallback_enabled,
    });
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable() {
        let bytes = b"not really a png but stable";
        assert_eq!(
            ImageFingerprint::compute(bytes),
            ImageFingerprint::compute(bytes)
        );
        assert_eq!(ImageFingerprint::compute(bytes).as_str().len(), 64);
    }

    #[test]
    fn key_is_sixteen_hex_chars() {
        let fp = ImageFingerprint::compute(b"payload");
        let key = IdempotencyKey::derive(&fp, &PipelineConfig::default());
        assert_eq!(key.as_str().len(), 16);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn equal_configs_yield_equal_keys() {
        let fp = ImageFingerprint::compute(b"payload");
        let a = PipelineConfig::default();
        // Same semantics reached through a different construction path.
        let b = PipelineConfig {
            min_span_confidence: 0.62f64.min(1.0),
            ..PipelineConfig::default()
        };
        assert_eq!(
            IdempotencyKey::derive(&fp, &a),
            IdempotencyKey::derive(&fp, &b)
        );
    }

    #[test]
    fn config_changes_change_the_key() {
        let fp = ImageFingerprint::compute(b"payload");
        let base = PipelineConfig::default();
        let mut flipped = base.clone();
        flipped.vision_fallback_enabled = !base.vision_fallback_enabled;
        assert_ne!(
            IdempotencyKey::derive(&fp, &base),
            IdempotencyKey::derive(&fp, &flipped)
        );
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let json = canonical_config_json(&PipelineConfig::default());
        let always = json.find("always_verify_catalogue").unwrap();
        let vision = json.find("vision_fallback_enabled").unwrap();
        assert!(always < vision);
    }
}
