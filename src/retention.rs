//! Scheduled retention and erasure.
//!
//! Four sweeps bound persisted state: hourly image deletion, a
//! fifteen-minute job sweep, a daily hash/log pass, and a weekly metric
//! trim. On top of those sit the per-principal export and erasure
//! operations and per-identifier deletion (job id or fingerprint digest).
//! Every sweep is callable directly so tests never wait on a timer.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cache::{CacheStore, TtlState};
use crate::config::RetentionConfig;
use crate::error::{Result, ServiceError};
use crate::jobs::{JobRecord, JobStore};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tiff"];

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepStats {
    pub deleted_files: usize,
    pub deleted_records: usize,
    pub ttl_backfilled: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
pub struct PrincipalExport {
    pub principal: String,
    pub exported_at: DateTime<Utc>,
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Default, Serialize)]
pub struct DeletionReport {
    pub jobs_deleted: usize,
    pub keys_deleted: usize,
    pub files_deleted: usize,
}

pub struct RetentionEngine {
    cache: Arc<CacheStore>,
    jobs: Arc<JobStore>,
    config: RetentionConfig,
}

impl RetentionEngine {
    pub fn new(cache: Arc<CacheStore>, jobs: Arc<JobStore>, config: RetentionConfig) -> Self {
        Self {
            cache,
            jobs,
            config,
        }
    }

    /// Start the four periodic sweeps. Handles are returned so the host can
    /// abort them on shutdown.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_loop(Duration::from_secs(3600), |engine| async move {
                let stats = engine.sweep_images().await;
                tracing::info!(?stats, "image sweep finished");
            }),
            self.spawn_loop(Duration::from_secs(900), |engine| async move {
                let stats = engine.sweep_jobs().await;
                tracing::info!(?stats, "job sweep finished");
            }),
            self.spawn_loop(Duration::from_secs(86_400), |engine| async move {
                let stats = engine.sweep_hashes_and_logs().await;
                tracing::info!(?stats, "hash and log sweep finished");
            }),
            self.spawn_loop(Duration::from_secs(604_800), |engine| async move {
                let removed = engine.trim_metrics().await;
                tracing::info!(removed, "metric trim finished");
            }),
        ]
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, period: Duration, body: F) -> JoinHandle<()>
    where
        F: Fn(Arc<RetentionEngine>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The immediate first tick would run the sweep at startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                body(engine.clone()).await;
            }
        })
    }

    /// Delete stored images older than the retention window and make sure
    /// every `image:*` entry carries a TTL.
    pub async fn sweep_images(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let retention = Duration::from_secs(self.config.images_retention_hours * 3600);
        let cutoff = std::time::SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(std::time::UNIX_EPOCH);

        let dir = Path::new(&self.config.image_dir);
        if dir.exists() {
            match tokio::fs::read_dir(dir).await {
                Ok(mut entries) => loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, "image sweep read_dir failed");
                            stats.errors += 1;
                            break;
                        }
                    };
                    let path = entry.path();
                    let is_image = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                        .unwrap_or(false);
                    if !is_image {
                        continue;
                    }
                    let expired = entry
                        .metadata()
                        .await
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .map(|modified| modified < cutoff)
                        .unwrap_or(false);
                    if expired {
                        match tokio::fs::remove_file(&path).await {
                            Ok(()) => {
                                tracing::info!(path = %path.display(), "deleted expired image");
                                stats.deleted_files += 1;
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, path = %path.display(), "image delete failed");
                                stats.errors += 1;
                            }
                        }
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "image sweep could not open directory");
                    stats.errors += 1;
                }
            }
        }

        for key in self.cache.scan_prefix("image:").await {
            if self.cache.ttl_state(&key).await == TtlState::Persistent {
                self.cache.expire(&key, retention).await;
                stats.ttl_backfilled += 1;
            }
        }
        stats
    }

    /// Delete jobs whose completion precedes the retention cutoff and make
    /// sure orphaned idempotency results cannot outlive it.
    pub async fn sweep_jobs(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let retention = chrono::Duration::seconds(self.config.jobs_retention_hours as i64 * 3600);
        let cutoff = Utc::now() - retention;

        for key in self.cache.scan_prefix("job:").await {
            let job_id = key.trim_start_matches("job:").to_string();
            let Some(job) = self.jobs.get_job(&job_id).await else {
                continue;
            };
            let expired = job
                .completed_at
                .map(|done| done < cutoff)
                .unwrap_or(false);
            if expired {
                if self.jobs.delete_job(&job_id).await {
                    stats.deleted_records += 1;
                }
            }
        }

        // Result records are keyed by idempotency key, not job id; bound
        // any that lost their TTL.
        let job_ttl = Duration::from_secs(self.config.jobs_retention_hours * 3600);
        for key in self.cache.scan_prefix("idem:").await {
            if key.ends_with(":result") && self.cache.ttl_state(&key).await == TtlState::Persistent
            {
                self.cache.expire(&key, job_ttl).await;
                stats.ttl_backfilled += 1;
            }
        }
        stats
    }

    /// Backfill TTLs on `hash:*` entries and rotate old log files.
    pub async fn sweep_hashes_and_logs(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let hash_ttl = Duration::from_secs(self.config.hashes_retention_days * 24 * 3600);
        for key in self.cache.scan_prefix("hash:").await {
            if self.cache.ttl_state(&key).await == TtlState::Persistent {
                self.cache.expire(&key, hash_ttl).await;
                stats.ttl_backfilled += 1;
            }
        }

        let log_retention = Duration::from_secs(self.config.logs_retention_days * 24 * 3600);
        let cutoff = std::time::SystemTime::now()
            .checked_sub(log_retention)
            .unwrap_or(std::time::UNIX_EPOCH);
        let dir = Path::new(&self.config.log_dir);
        if dir.exists() {
            if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let path = entry.path();
                    let is_log = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.contains(".log"))
                        .unwrap_or(false);
                    if !is_log {
                        continue;
                    }
                    let expired = entry
                        .metadata()
                        .await
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .map(|modified| modified < cutoff)
                        .unwrap_or(false);
                    if expired {
                        match tokio::fs::remove_file(&path).await {
                            Ok(()) => stats.deleted_files += 1,
                            Err(err) => {
                                tracing::warn!(error = %err, path = %path.display(), "log delete failed");
                                stats.errors += 1;
                            }
                        }
                    }
                }
            }
        }
        stats
    }

    /// Trim metric series by timestamp score.
    pub async fn trim_metrics(&self) -> usize {
        let retention = self.config.metrics_retention_days as i64 * 24 * 3600;
        let cutoff = (Utc::now().timestamp() - retention) as f64;
        let mut removed = 0;
        for key in self.cache.scan_prefix("metric:").await {
            removed += self.cache.zremrangebyscore(&key, 0.0, cutoff).await;
        }
        removed
    }

    /// Collect every record indexed under a principal into a portable
    /// archive.
    pub async fn export_principal(&self, principal: &str) -> PrincipalExport {
        let jobs = self.jobs.jobs_for_principal(principal, 100, 0).await;
        PrincipalExport {
            principal: principal.to_string(),
            exported_at: Utc::now(),
            jobs,
        }
    }

    /// Delete everything owned by a principal. Returns the number of
    /// removed keys.
    pub async fn erase_principal(&self, principal: &str) -> usize {
        let mut removed = 0;

        let jobs = self.jobs.jobs_for_principal(principal, 100, 0).await;
        for job in jobs {
            if self.jobs.delete_job(&job.id).await {
                removed += 1;
            }
        }
        if self
            .cache
            .delete(&JobStore::user_index_key(principal))
            .await
        {
            removed += 1;
        }
        for prefix in ["rate:submit:", "rate:export:"] {
            if self.cache.delete(&format!("{prefix}{principal}")).await {
                removed += 1;
            }
        }
        tracing::info!(principal, removed, "principal data erased");
        removed
    }

    /// Delete by identifier: a 36-char job UUID or a 64-hex fingerprint.
    pub async fn delete_identifier(&self, identifier: &str) -> Result<DeletionReport> {
        let mut report = DeletionReport::default();

        if identifier.len() == 36 && uuid::Uuid::parse_str(identifier).is_ok() {
            if self.jobs.delete_job(identifier).await {
                report.jobs_deleted += 1;
            }
            return Ok(report);
        }

        let is_digest =
            identifier.len() == 64 && identifier.chars().all(|c| c.is_ascii_hexdigit());
        if is_digest {
            for job_id in self
                .cache
                .smembers(&JobStore::hash_index_key(identifier))
                .await
            {
                if self.jobs.delete_job(&job_id).await {
                    report.jobs_deleted += 1;
                }
            }
            // The hash marker points at the execution identity; follow it
            // so the cached pipeline result disappears with the image.
            if let Some(bytes) = self.cache.get(&format!("hash:{identifier}")).await {
                if let Ok(idem_key) = String::from_utf8(bytes) {
                    for key in [
                        format!("ocr:{idem_key}"),
                        format!("idem:{idem_key}:result"),
                    ] {
                        if self.cache.delete(&key).await {
                            report.keys_deleted += 1;
                        }
                    }
                }
            }
            for key in [
                JobStore::hash_index_key(identifier),
                format!("image:{identifier}"),
                format!("hash:{identifier}"),
            ] {
                if self.cache.delete(&key).await {
                    report.keys_deleted += 1;
                }
            }
            let path = Path::new(&self.config.image_dir).join(format!("{identifier}.png"));
            if tokio::fs::remove_file(&path).await.is_ok() {
                report.files_deleted += 1;
            }
            return Ok(report);
        }

        Err(ServiceError::Validation(format!(
            "identifier {identifier:?} is neither a job id nor a fingerprint"
        )))
    }
}
