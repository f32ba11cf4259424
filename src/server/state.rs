//! Shared application state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::cache::CacheStore;
use crate::catalogue::CatalogueStore;
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::fallback::VisionGate;
use crate::jobs::JobStore;
use crate::ocr::OcrProvider;
use crate::pipeline::Pipeline;
use crate::progress::ProgressChannel;
use crate::ratelimit::RateLimiter;
use crate::retention::RetentionEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub cache: Arc<CacheStore>,
    pub catalogue: Arc<CatalogueStore>,
    pub jobs: Arc<JobStore>,
    pub gate: Arc<VisionGate>,
    pub progress: Arc<ProgressChannel>,
    pub pipeline: Arc<Pipeline>,
    pub retention: Arc<RetentionEngine>,
    pub submit_limiter: Arc<RateLimiter>,
    pub export_limiter: Arc<RateLimiter>,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the full dependency graph from a configuration, a loaded
    /// catalogue, and an OCR provider.
    pub async fn build(
        config: ServiceConfig,
        catalogue: Arc<CatalogueStore>,
        ocr: Arc<dyn OcrProvider>,
    ) -> Result<Self> {
        let cache = Self::open_cache(&config).await;
        let gate = Arc::new(VisionGate::new(config.vision.clone()));
        let jobs = Arc::new(JobStore::new(
            cache.clone(),
            Duration::from_secs(config.retention.jobs_retention_hours * 3600),
        ));
        let progress = Arc::new(ProgressChannel::new(Duration::from_millis(
            config.jobs.send_deadline_ms,
        )));
        let pipeline = Arc::new(Pipeline::new(
            config.clone(),
            cache.clone(),
            catalogue.clone(),
            ocr,
            gate.clone(),
            jobs.clone(),
            progress.clone(),
        ));
        let retention = Arc::new(RetentionEngine::new(
            cache.clone(),
            jobs.clone(),
            config.retention.clone(),
        ));
        let submit_limiter = Arc::new(RateLimiter::new(cache.clone(), "submit"));
        let export_limiter = Arc::new(RateLimiter::new(cache.clone(), "export"));

        // A second recorder install in the same process (tests) is fine;
        // the endpoint just reports metrics as unavailable.
        let metrics = match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(error = %err, "prometheus recorder not installed");
                None
            }
        };

        Ok(Self {
            config: Arc::new(config),
            cache,
            catalogue,
            jobs,
            gate,
            progress,
            pipeline,
            retention,
            submit_limiter,
            export_limiter,
            metrics,
            started_at: Instant::now(),
        })
    }

    #[cfg(feature = "backend-redis")]
    async fn open_cache(config: &ServiceConfig) -> Arc<CacheStore> {
        match &config.cache.redis_url {
            Some(url) => Arc::new(CacheStore::connect(url, config.cache.memory_cap).await),
            None => Arc::new(CacheStore::in_memory(config.cache.memory_cap)),
        }
    }

    #[cfg(not(feature = "backend-redis"))]
    async fn open_cache(config: &ServiceConfig) -> Arc<CacheStore> {
        if config.cache.redis_url.is_some() {
            tracing::warn!("redis_url configured but backend-redis is not compiled in");
        }
        Arc::new(CacheStore::in_memory(config.cache.memory_cap))
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
