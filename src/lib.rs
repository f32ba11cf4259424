//! Asynchronous image-to-deck OCR service core.
//!
//! A submission travels: intake validation → content-addressed fingerprint
//! and idempotency key → job creation → lock-protected pipeline execution
//! (preprocess variants → best-of OCR → gated vision fallback → deck parse
//! → catalogue resolution → structural rules) → stored result → progress
//! fan-out → on-demand export.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use deckscan::{
//!     CacheStore, CatalogueStore, JobStore, Pipeline, PipelineConfig,
//!     ProgressChannel, ServiceConfig, VisionGate,
//! };
//!
//! # async fn demo(ocr: Arc<dyn deckscan::OcrProvider>) -> deckscan::Result<()> {
//! let config = ServiceConfig::default();
//! let cache = Arc::new(CacheStore::in_memory(config.cache.memory_cap));
//! let catalogue = Arc::new(CatalogueStore::open(&config.catalogue.db_path)?);
//! let gate = Arc::new(VisionGate::new(config.vision.clone()));
//! let jobs = Arc::new(JobStore::new(
//!     cache.clone(),
//!     std::time::Duration::from_secs(config.retention.jobs_retention_hours * 3600),
//! ));
//! let progress = Arc::new(ProgressChannel::new(std::time::Duration::from_millis(
//!     config.jobs.send_deadline_ms,
//! )));
//! let pipeline = Arc::new(Pipeline::new(
//!     config.clone(), cache, catalogue, ocr, gate, jobs, progress,
//! ));
//!
//! let sanitized = deckscan::intake::validate_upload(
//!     Some("deck.png"), &std::fs::read("deck.png")?, &config.limits,
//! )?;
//! let outcome = pipeline
//!     .submit(sanitized, config.pipeline_defaults(), None)
//!     .await?;
//! println!("job {} cached={}", outcome.job_id, outcome.cached);
//! # Ok(())
//! # }
//! ```
//!
//! The OCR engine and the vision provider are external: callers hand the
//! pipeline an [`OcrProvider`] implementation. [`ocr::stub`] ships a
//! scripted offline provider and a fault-injecting one for tests and
//! engine-less deployments.
//!
//! Feature `server` adds the axum HTTP/WebSocket surface and the
//! `deckscan` binary; `backend-redis` adds the remote cache backend behind
//! the always-present in-process fallback; `online-catalogue` adds the
//! live catalogue client.

pub mod cache;
pub mod catalogue;
pub mod config;
pub mod error;
pub mod export;
pub mod fallback;
pub mod fingerprint;
pub mod idempotency;
pub mod intake;
pub mod jobs;
pub mod ocr;
pub mod parser;
pub mod pipeline;
pub mod preprocess;
pub mod progress;
pub mod ratelimit;
pub mod resolver;
pub mod retention;
pub mod rules;

#[cfg(feature = "server")]
pub mod server;

pub use cache::{CacheStats, CacheStore};
pub use catalogue::{
    Candidate, CardLayout, CatalogueCard, CatalogueStore, Resolution, ResolutionSource,
};
pub use config::{PipelineConfig, PreprocessFlags, ServiceConfig};
pub use error::{Result, ServiceError};
pub use export::{export, ExportFormat};
pub use fallback::{CircuitState, GateStatus, VisionGate};
pub use fingerprint::{IdempotencyKey, ImageFingerprint};
pub use idempotency::{ExecutionOutcome, IdempotentExecutor};
pub use intake::SanitizedImage;
pub use jobs::{JobRecord, JobState, JobStore, JobUpdate};
pub use ocr::{OcrProvider, OcrSpan, RawOcr};
pub use parser::{parse_spans, CardEntry, ParsedDeck};
pub use pipeline::{DeckResult, Pipeline, SubmitOutcome};
pub use progress::{ProgressChannel, ProgressFrame, Subscription};
pub use ratelimit::{RateDecision, RateLimiter, RateLimits};
pub use resolver::{NormalizedCard, NormalizedDeck, Resolver};
pub use retention::{PrincipalExport, RetentionEngine};
