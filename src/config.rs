//! Service configuration.
//!
//! All sections have serde defaults so a partial YAML file (or none at all)
//! yields a runnable configuration. [`ServiceConfig::from_file`] loads and
//! validates; [`ServiceConfig::pipeline_defaults`] derives the per-request
//! [`PipelineConfig`] that participates in the idempotency key.
//!
//! ```yaml
//! vision:
//!   enabled: true
//!   failure_threshold: 5
//! limits:
//!   rate_limit_minute: 30
//! catalogue:
//!   db_path: "./data/catalogue.sqlite"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Language tags the OCR engine accepts, in preference order.
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "fr", "de", "es", "it", "pt", "ja"];

/// The single primary OCR engine this build recognizes.
pub const PRIMARY_ENGINE: &str = "easyocr";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub retention: RetentionConfig,
    pub ocr: OcrConfig,
    pub catalogue: CatalogueConfig,
    pub vision: VisionConfig,
    pub limits: LimitConfig,
    pub idempotency: IdempotencyConfig,
    pub cache: CacheConfig,
    pub jobs: JobConfig,
    pub server: ServerConfig,
}

impl ServiceConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ocr.validate()?;
        self.vision.validate()?;
        self.limits.validate()?;
        self.jobs.validate()?;
        Ok(())
    }

    /// The per-request pipeline configuration implied by this service
    /// configuration. Callers may override individual recognized options
    /// before submission; the result participates in the idempotency key.
    pub fn pipeline_defaults(&self) -> PipelineConfig {
        PipelineConfig {
            engine: PRIMARY_ENGINE.to_string(),
            languages: self.ocr.languages.clone(),
            min_span_confidence: self.ocr.min_span_confidence,
            min_quantity_lines: self.ocr.min_quantity_lines,
            fuzzy_top_k: self.catalogue.fuzzy_top_k,
            always_verify_catalogue: self.catalogue.always_verify,
            vision_fallback_enabled: self.vision.enabled,
            preprocess: PreprocessFlags::default(),
            catalogue_snapshot: self.catalogue.snapshot.clone(),
        }
    }
}

/// Retention windows and on-disk locations swept by the retention engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub images_retention_hours: u64,
    pub jobs_retention_hours: u64,
    pub hashes_retention_days: u64,
    pub logs_retention_days: u64,
    pub metrics_retention_days: u64,
    pub image_dir: String,
    pub log_dir: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            images_retention_hours: 24,
            jobs_retention_hours: 1,
            hashes_retention_days: 7,
            logs_retention_days: 7,
            metrics_retention_days: 30,
            image_dir: "./data/uploads".to_string(),
            log_dir: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Spans below this confidence are dropped from every OCR result.
    pub min_span_confidence: f64,
    /// Results with fewer quantity-shaped lines than this are fallback
    /// candidates.
    pub min_quantity_lines: u32,
    /// Best-of may stop early once mean confidence reaches this value.
    pub early_stop_confidence: f64,
    pub languages: Vec<String>,
    /// Long-edge cap applied when scaling variants.
    pub max_long_edge_px: u32,
    /// Below this long edge the super-resolution upscale kicks in (when the
    /// request enables it).
    pub superres_min_edge_px: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_span_confidence: 0.62,
            min_quantity_lines: 10,
            early_stop_confidence: 0.85,
            languages: vec!["en".to_string()],
            max_long_edge_px: 1920,
            superres_min_edge_px: 1000,
        }
    }
}

impl OcrConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_span_confidence) {
            return Err(ConfigError::Validation(
                "ocr.min_span_confidence must be in [0, 1]".to_string(),
            ));
        }
        if self.languages.is_empty() {
            return Err(ConfigError::Validation(
                "ocr.languages must not be empty".to_string(),
            ));
        }
        for lang in &self.languages {
            if !SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "ocr.languages: unsupported tag {lang:?}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueConfig {
    pub db_path: String,
    pub online_enabled: bool,
    pub remote_timeout_secs: u64,
    /// Minimum spacing between remote catalogue calls.
    pub remote_min_interval_ms: u64,
    pub fuzzy_top_k: usize,
    pub always_verify: bool,
    /// Snapshot date tag baked into the idempotency key.
    pub snapshot: String,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/catalogue.sqlite".to_string(),
            online_enabled: true,
            remote_timeout_secs: 5,
            remote_min_interval_ms: 120,
            fuzzy_top_k: 5,
            always_verify: true,
            snapshot: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub enabled: bool,
    pub min_confidence: f64,
    pub min_lines: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub monitoring_window_secs: u64,
    pub max_fallback_rate: f64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_confidence: 0.62,
            min_lines: 10,
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            monitoring_window_secs: 900,
            max_fallback_rate: 0.15,
        }
    }
}

impl VisionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Validation(
                "vision.min_confidence must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_fallback_rate) {
            return Err(ConfigError::Validation(
                "vision.max_fallback_rate must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Intake bounds and request rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub max_image_mib: u64,
    pub min_image_bytes: u64,
    pub min_dimension: u32,
    pub max_dimension: u32,
    pub rate_limit_minute: u32,
    pub export_rate_limit_minute: u32,
    pub rate_limit_burst: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_image_mib: 10,
            min_image_bytes: 1024,
            min_dimension: 100,
            max_dimension: 4096,
            rate_limit_minute: 30,
            export_rate_limit_minute: 20,
            rate_limit_burst: 3,
        }
    }
}

impl LimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_dimension >= self.max_dimension {
            return Err(ConfigError::Validation(
                "limits.min_dimension must be below limits.max_dimension".to_string(),
            ));
        }
        if self.rate_limit_minute == 0 || self.rate_limit_burst == 0 {
            return Err(ConfigError::Validation(
                "limits.rate_limit_minute and rate_limit_burst must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub lock_ttl_secs: u64,
    pub block_wait_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 30,
            block_wait_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry cap for the in-process fallback map.
    pub memory_cap: usize,
    /// Remote store URL; only consulted when the `backend-redis` feature is
    /// compiled in.
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_cap: 10_000,
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Soft execution limit; the pipeline checks it at stage boundaries.
    pub soft_timeout_secs: u64,
    /// Hard wall-clock limit enforced around the whole execution.
    pub hard_timeout_secs: u64,
    /// Cadence of periodic progress frames to subscribers.
    pub progress_interval_secs: u64,
    /// Deadline for a single frame send before the subscriber is evicted.
    pub send_deadline_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            soft_timeout_secs: 240,
            hard_timeout_secs: 300,
            progress_interval_secs: 2,
            send_deadline_ms: 500,
        }
    }
}

impl JobConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_timeout_secs > self.hard_timeout_secs {
            return Err(ConfigError::Validation(
                "jobs.soft_timeout_secs must not exceed jobs.hard_timeout_secs".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub enable_cors: bool,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            enable_cors: true,
            request_timeout_secs: 60,
        }
    }
}

/// Per-variant preprocessing switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessFlags {
    pub denoise: bool,
    pub binarize: bool,
    pub sharpen: bool,
    pub superres: bool,
}

impl Default for PreprocessFlags {
    fn default() -> Self {
        Self {
            denoise: true,
            binarize: true,
            sharpen: true,
            superres: false,
        }
    }
}

/// The recognized per-request options. Two submissions with equal image
/// bytes and an equal `PipelineConfig` produce the same idempotency key, so
/// everything here must be canonically serializable (see
/// [`crate::fingerprint::canonical_config_json`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub engine: String,
    pub languages: Vec<String>,
    pub min_span_confidence: f64,
    pub min_quantity_lines: u32,
    pub fuzzy_top_k: usize,
    pub always_verify_catalogue: bool,
    pub vision_fallback_enabled: bool,
    pub preprocess: PreprocessFlags,
    pub catalogue_snapshot: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: PRIMARY_ENGINE.to_string(),
            languages: vec!["en".to_string()],
            min_span_confidence: 0.62,
            min_quantity_lines: 10,
            fuzzy_top_k: 5,
            always_verify_catalogue: true,
            vision_fallback_enabled: false,
            preprocess: PreprocessFlags::default(),
            catalogue_snapshot: String::new(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine != PRIMARY_ENGINE {
            return Err(ConfigError::Validation(format!(
                "engine must be {PRIMARY_ENGINE:?}"
            )));
        }
        if self.languages.is_empty() {
            return Err(ConfigError::Validation(
                "languages must not be empty".to_string(),
            ));
        }
        for lang in &self.languages {
            if !SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "unsupported language tag {lang:?}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.min_span_confidence) {
            return Err(ConfigError::Validation(
                "min_span_confidence must be in [0, 1]".to_string(),
            ));
        }
        if self.fuzzy_top_k == 0 {
            return Err(ConfigError::Validation(
                "fuzzy_top_k must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
