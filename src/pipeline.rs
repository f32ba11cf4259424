//! End-to-end pipeline orchestration.
//!
//! A submission becomes a job; the job runs preprocess → OCR (with the
//! gated vision fallback) → parse → resolve → rules, publishing progress
//! at the stage boundaries (20/40/60/80/100). Execution is wrapped in the
//! idempotency protocol so one (image, config) pair runs at most once per
//! retention window, and in a hard wall-clock timeout so a wedged stage
//! cannot hold a worker forever. Cancellation is cooperative at the same
//! boundaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::CacheStore;
use crate::catalogue::CatalogueStore;
use crate::config::{PipelineConfig, ServiceConfig};
use crate::error::{Result, ServiceError};
use crate::fallback::VisionGate;
use crate::fingerprint::{IdempotencyKey, ImageFingerprint};
use crate::idempotency::IdempotentExecutor;
use crate::intake::SanitizedImage;
use crate::jobs::{JobState, JobStore, JobUpdate};
use crate::ocr::{best_of, quantity_line_count, OcrProvider, RawOcr};
use crate::parser::{parse_spans, ParsedDeck};
use crate::preprocess::preprocess_variants;
use crate::progress::{ProgressChannel, ProgressFrame};
use crate::resolver::{NormalizedDeck, Resolver};
use crate::rules::{apply_lands_miscount, validate_and_fill};

const OCR_RESULT_TTL: Duration = Duration::from_secs(3600);

/// Everything the pipeline produces for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckResult {
    pub job_id: String,
    pub raw: RawOcr,
    pub parsed: ParsedDeck,
    pub normalized: NormalizedDeck,
    pub timings_ms: HashMap<String, u64>,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub job_id: String,
    pub cached: bool,
}

pub struct Pipeline {
    config: ServiceConfig,
    cache: Arc<CacheStore>,
    ocr: Arc<dyn OcrProvider>,
    gate: Arc<VisionGate>,
    jobs: Arc<JobStore>,
    progress: Arc<ProgressChannel>,
    resolver: Resolver,
    executor: IdempotentExecutor,
}

impl Pipeline {
    pub fn new(
        config: ServiceConfig,
        cache: Arc<CacheStore>,
        catalogue: Arc<CatalogueStore>,
        ocr: Arc<dyn OcrProvider>,
        gate: Arc<VisionGate>,
        jobs: Arc<JobStore>,
        progress: Arc<ProgressChannel>,
    ) -> Self {
        let resolver = Resolver::new(catalogue, cache.clone());
        let executor = IdempotentExecutor::new(cache.clone(), &config.idempotency);
        Self {
            config,
            cache,
            ocr,
            gate,
            jobs,
            progress,
            resolver,
            executor,
        }
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    pub fn progress_channel(&self) -> &Arc<ProgressChannel> {
        &self.progress
    }

    pub fn gate(&self) -> &Arc<VisionGate> {
        &self.gate
    }

    /// Register a submission and start background execution. Returns the
    /// idempotency hit when an equal (image, config) pair already has a
    /// completed job.
    pub async fn submit(
        self: &Arc<Self>,
        image: SanitizedImage,
        pipeline_config: PipelineConfig,
        principal: Option<String>,
    ) -> Result<SubmitOutcome> {
        pipeline_config
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let fingerprint = ImageFingerprint::compute(&image.bytes);
        let key = IdempotencyKey::derive(&fingerprint, &pipeline_config);

        // A completed job with the same fingerprint *and* key is a hit; a
        // same-image submission under a different config never is.
        if let Some(existing) = self.jobs.find_by_fingerprint(fingerprint.as_str()).await {
            if let Some(job) = self.jobs.get_job(&existing).await {
                let same_key = job
                    .metadata
                    .get("idempotency_key")
                    .and_then(|v| v.as_str())
                    .map(|k| k == key.as_str())
                    .unwrap_or(false);
                if same_key {
                    tracing::info!(job_id = existing, "idempotent submission hit");
                    return Ok(SubmitOutcome {
                        job_id: existing,
                        cached: true,
                    });
                }
            }
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let metadata = serde_json::json!({
            "width": image.width,
            "height": image.height,
            "idempotency_key": key.as_str(),
        });
        self.jobs
            .create_job(
                &job_id,
                Some(fingerprint.as_str()),
                principal.as_deref(),
                metadata,
            )
            .await?;

        self.persist_upload(&fingerprint, &image).await;

        // Fingerprint marker: maps the content hash to its latest
        // execution identity and bounds it with the hashes retention.
        let hashes_ttl =
            Duration::from_secs(self.config.retention.hashes_retention_days * 24 * 3600);
        self.cache
            .set(
                &format!("hash:{fingerprint}"),
                key.as_str().as_bytes().to_vec(),
                Some(hashes_ttl),
            )
            .await;

        let pipeline = self.clone();
        let spawn_job_id = job_id.clone();
        tokio::spawn(async move {
            pipeline
                .run_job(spawn_job_id, image, pipeline_config, key)
                .await;
        });

        Ok(SubmitOutcome {
            job_id,
            cached: false,
        })
    }

    /// Store the sanitized upload for the retention window, with a cache
    /// marker carrying the same TTL.
    async fn persist_upload(&self, fingerprint: &ImageFingerprint, image: &SanitizedImage) {
        let dir = std::path::Path::new(&self.config.retention.image_dir);
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(error = %err, "could not create upload directory");
            return;
        }
        let path = dir.join(format!("{fingerprint}.png"));
        if let Err(err) = tokio::fs::write(&path, &image.bytes).await {
            tracing::warn!(error = %err, path = %path.display(), "could not persist upload");
            return;
        }
        let ttl = Duration::from_secs(self.config.retention.images_retention_hours * 3600);
        self.cache
            .set(
                &format!("image:{fingerprint}"),
                path.display().to_string().into_bytes(),
                Some(ttl),
            )
            .await;
    }

    /// Drive one job to a terminal state. Never returns an error: failures
    /// become the job's terminal state.
    pub async fn run_job(
        self: Arc<Self>,
        job_id: String,
        image: SanitizedImage,
        pipeline_config: PipelineConfig,
        key: IdempotencyKey,
    ) {
        let hard_limit = Duration::from_secs(self.config.jobs.hard_timeout_secs);
        let retention = self.jobs.retention();

        let execution = tokio::time::timeout(
            hard_limit,
            self.executor.execute(&key, retention, || {
                self.process(job_id.clone(), image, pipeline_config, key.clone())
            }),
        )
        .await;

        match execution {
            Ok(Ok(outcome)) => {
                let mut result = outcome.value;
                result.job_id = job_id.clone();
                let value = match serde_json::to_value(&result) {
                    Ok(value) => value,
                    Err(err) => {
                        self.fail_job(&job_id, &ServiceError::Internal(err.to_string()))
                            .await;
                        return;
                    }
                };
                let _ = self
                    .jobs
                    .update_job(
                        &job_id,
                        JobUpdate {
                            state: Some(JobState::Completed),
                            progress: Some(100),
                            result: Some(value),
                            ..JobUpdate::default()
                        },
                    )
                    .await;
                self.publish_state(&job_id).await;
                tracing::info!(job_id, from_cache = outcome.from_cache, "job completed");
            }
            Ok(Err(err)) => {
                self.fail_job(&job_id, &err).await;
            }
            Err(_) => {
                let err = ServiceError::Timeout(self.config.jobs.hard_timeout_secs);
                self.fail_job(&job_id, &err).await;
            }
        }
    }

    async fn fail_job(&self, job_id: &str, err: &ServiceError) {
        tracing::warn!(job_id, error = %err, code = err.code(), "job failed");
        let _ = self
            .jobs
            .update_job(
                job_id,
                JobUpdate {
                    state: Some(JobState::Failed),
                    error: Some(format!("{}: {err}", err.code())),
                    ..JobUpdate::default()
                },
            )
            .await;
        self.publish_state(job_id).await;
    }

    /// The pipeline body. Runs under the idempotency lock; everything it
    /// returns is cacheable.
    async fn process(
        &self,
        job_id: String,
        image: SanitizedImage,
        pipeline_config: PipelineConfig,
        key: IdempotencyKey,
    ) -> Result<DeckResult> {
        // OCR-layer result reuse is scoped by the idempotency key, so a
        // different config over the same pixels never sees this entry.
        let ocr_key = format!("ocr:{}", key.as_str());
        if let Some(mut cached) = self.cache.get_json::<DeckResult>(&ocr_key).await {
            cached.job_id = job_id;
            return Ok(cached);
        }

        let started = Instant::now();
        let soft_limit = Duration::from_secs(self.config.jobs.soft_timeout_secs);
        let mut timings = HashMap::new();

        self.advance(&job_id, 0).await?;

        // Stage 1: preprocessing variants (CPU-bound).
        let stage = Instant::now();
        let flags = pipeline_config.preprocess.clone();
        let ocr_cfg = self.config.ocr.clone();
        let decoded = image.image.clone();
        let variants =
            tokio::task::spawn_blocking(move || preprocess_variants(&decoded, &flags, &ocr_cfg))
                .await
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
        timings.insert("preprocess".to_string(), ms(stage));
        self.check_deadline(started, soft_limit)?;
        self.advance(&job_id, 20).await?;

        // Stage 2: best-of OCR plus the gated vision fallback.
        let stage = Instant::now();
        let mut raw = best_of(
            self.ocr.as_ref(),
            &variants,
            pipeline_config.min_span_confidence,
            self.config.ocr.early_stop_confidence,
        )
        .await?;

        let lines = quantity_line_count(&raw.spans);
        let mut fallback_used = false;
        if pipeline_config.vision_fallback_enabled
            && self
                .gate
                .should_use_fallback(raw.mean_confidence, lines, image.width, image.height)
        {
            fallback_used = true;
            match self.ocr.vision(&image.image).await {
                Ok(vision_raw) => {
                    self.gate.record_success();
                    raw = vision_raw;
                }
                Err(err) => {
                    // Degraded but not fatal: keep the primary result.
                    self.gate.record_failure();
                    tracing::warn!(job_id, error = %err, "vision fallback failed, keeping primary OCR");
                    fallback_used = false;
                }
            }
        }
        self.gate.record_request(fallback_used);
        timings.insert("ocr".to_string(), ms(stage));
        self.check_deadline(started, soft_limit)?;
        self.advance(&job_id, 40).await?;

        // Stage 3: parse spans into deck sections.
        let parsed = parse_spans(&raw.spans);
        self.advance(&job_id, 60).await?;

        // Stage 4: catalogue enrichment and normalization.
        let stage = Instant::now();
        let enriched = self.resolver.enrich(parsed, &pipeline_config).await?;
        let normalized = self.resolver.normalize(&enriched).await?;
        timings.insert("resolve".to_string(), ms(stage));
        self.check_deadline(started, soft_limit)?;
        self.advance(&job_id, 80).await?;

        // Stage 5: business rules.
        let repaired = validate_and_fill(apply_lands_miscount(normalized))?;
        timings.insert("total".to_string(), ms(started));

        let result = DeckResult {
            job_id,
            raw,
            parsed: enriched,
            normalized: repaired,
            timings_ms: timings,
            fallback_used,
        };
        self.cache
            .set_json(&ocr_key, &result, Some(OCR_RESULT_TTL))
            .await;
        Ok(result)
    }

    /// Move the job forward and notify observers. Errors out when the job
    /// was cancelled, which stops the pipeline at the stage boundary.
    async fn advance(&self, job_id: &str, progress: u8) -> Result<()> {
        if let Some(job) = self.jobs.get_job(job_id).await {
            if job.state == JobState::Cancelled {
                return Err(ServiceError::Internal("job cancelled".to_string()));
            }
        }
        let _ = self
            .jobs
            .update_job(
                job_id,
                JobUpdate {
                    state: Some(JobState::Processing),
                    progress: Some(progress),
                    ..JobUpdate::default()
                },
            )
            .await;
        self.publish_state(job_id).await;
        Ok(())
    }

    async fn publish_state(&self, job_id: &str) {
        if let Some(job) = self.jobs.get_job(job_id).await {
            self.progress
                .publish(job_id, ProgressFrame::from_job(&job))
                .await;
        }
    }

    fn check_deadline(&self, started: Instant, soft_limit: Duration) -> Result<()> {
        if started.elapsed() > soft_limit {
            return Err(ServiceError::Timeout(soft_limit.as_secs()));
        }
        Ok(())
    }
}

fn ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
