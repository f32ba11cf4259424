//! Job storage over the cache layer.
//!
//! Records live at `job:<uuid>` with two indices: `idx:hash:<fingerprint>`
//! (set of job ids) and `idx:user:<principal>` (score-ordered by creation
//! time). Everything carries the jobs-retention TTL. Terminal states are
//! immutable until expiry and progress never decreases.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStore;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn tag(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub state: JobState,
    pub progress: u8,
    pub fingerprint: Option<String>,
    pub principal: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update applied under last-writer-wins on non-terminal fields.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct JobStore {
    cache: Arc<CacheStore>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(cache: Arc<CacheStore>, retention: Duration) -> Self {
        Self {
            cache,
            ttl: retention,
        }
    }

    pub fn job_key(job_id: &str) -> String {
        format!("job:{job_id}")
    }

    pub fn hash_index_key(fingerprint: &str) -> String {
        format!("idx:hash:{fingerprint}")
    }

    pub fn user_index_key(principal: &str) -> String {
        format!("idx:user:{principal}")
    }

    /// Atomically create a job in `queued`; false when the id exists.
    pub async fn create_job(
        &self,
        job_id: &str,
        fingerprint: Option<&str>,
        principal: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<bool> {
        let now = Utc::now();
        let record = JobRecord {
            id: job_id.to_string(),
            state: JobState::Queued,
            progress: 0,
            fingerprint: fingerprint.map(str::to_string),
            principal: principal.map(str::to_string),
            metadata,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let bytes = serde_json::to_vec(&record)?;
        let created = self
            .cache
            .set_nx(&Self::job_key(job_id), bytes, Some(self.ttl))
            .await;
        if !created {
            tracing::warn!(job_id, "job already exists");
            return Ok(false);
        }

        if let Some(fp) = fingerprint {
            self.cache
                .sadd(&Self::hash_index_key(fp), job_id, Some(self.ttl))
                .await;
        }
        if let Some(user) = principal {
            self.cache
                .zadd(
                    &Self::user_index_key(user),
                    job_id,
                    now.timestamp_millis() as f64,
                    Some(self.ttl),
                )
                .await;
        }
        tracing::info!(job_id, "job created");
        Ok(true)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobRecord> {
        self.cache.get_json(&Self::job_key(job_id)).await
    }

    /// Apply an update. Terminal records reject every mutation; progress is
    /// clamped monotonic non-decreasing.
    pub async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<bool> {
        let mut record = match self.get_job(job_id).await {
            Some(record) => record,
            None => return Ok(false),
        };

        if record.state.is_terminal() {
            tracing::warn!(job_id, state = record.state.tag(), "update on terminal job ignored");
            return Ok(false);
        }

        if let Some(state) = update.state {
            record.state = state;
            if state.is_terminal() {
                record.completed_at = Some(Utc::now());
                if state == JobState::Completed {
                    record.progress = 100;
                }
            }
        }
        if let Some(progress) = update.progress {
            record.progress = record.progress.max(progress.min(100));
        }
        if let Some(result) = update.result {
            record.result = Some(result);
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        record.updated_at = Utc::now();

        self.cache
            .set_json(&Self::job_key(job_id), &record, Some(self.ttl))
            .await;
        tracing::debug!(
            job_id,
            state = record.state.tag(),
            progress = record.progress,
            "job updated"
        );
        Ok(true)
    }

    /// Most recent completed job for a fingerprint, for idempotency hits.
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Option<String> {
        let ids = self.cache.smembers(&Self::hash_index_key(fingerprint)).await;
        let mut best: Option<(DateTime<Utc>, String)> = None;
        for id in ids {
            if let Some(job) = self.get_job(&id).await {
                if job.state == JobState::Completed {
                    let newer = best
                        .as_ref()
                        .map(|(at, _)| job.created_at > *at)
                        .unwrap_or(true);
                    if newer {
                        best = Some((job.created_at, id));
                    }
                }
            }
        }
        best.map(|(_, id)| id)
    }

    /// Recent jobs for a principal, newest first. Pagination is clamped to
    /// sane bounds.
    pub async fn jobs_for_principal(
        &self,
        principal: &str,
        limit: usize,
        offset: usize,
    ) -> Vec<JobRecord> {
        let limit = limit.clamp(1, 100);
        let offset = offset.min(10_000);
        let ids = self
            .cache
            .zrevrange(&Self::user_index_key(principal), offset, limit)
            .await;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_job(&id).await {
                jobs.push(job);
            }
        }
        jobs
    }

    /// Remove a job record and its index entries.
    pub async fn delete_job(&self, job_id: &str) -> bool {
        if let Some(record) = self.get_job(job_id).await {
            if let Some(fp) = &record.fingerprint {
                self.cache.srem(&Self::hash_index_key(fp), job_id).await;
            }
            if let Some(user) = &record.principal {
                self.cache.zrem(&Self::user_index_key(user), job_id).await;
            }
        }
        self.cache.delete(&Self::job_key(job_id)).await
    }

    pub async fn stats(&self) -> JobStats {
        let mut stats = JobStats::default();
        for key in self.cache.scan_prefix("job:").await {
            let id = key.trim_start_matches("job:");
            if let Some(job) = self.get_job(id).await {
                stats.total += 1;
                match job.state {
                    JobState::Queued => stats.queued += 1,
                    JobState::Processing => stats.processing += 1,
                    JobState::Completed => stats.completed += 1,
                    JobState::Failed => stats.failed += 1,
                    JobState::Cancelled => stats.cancelled += 1,
                }
            }
        }
        stats
    }

    pub fn retention(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> JobStore {
        JobStore::new(
            Arc::new(CacheStore::in_memory(1024)),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn create_is_idempotent_per_id() {
        let jobs = store();
        assert!(jobs
            .create_job("job-1", Some("fp"), Some("alice"), serde_json::json!({}))
            .await
            .unwrap());
        assert!(!jobs
            .create_job("job-1", None, None, serde_json::json!({}))
            .await
            .unwrap());
        let record = jobs.get_job("job-1").await.unwrap();
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.progress, 0);
    }

    #[tokio::test]
    async fn progress_is_monotonic() {
        let jobs = store();
        jobs.create_job("job-1", None, None, serde_json::json!({}))
            .await
            .unwrap();
        jobs.update_job(
            "job-1",
            JobUpdate {
                progress: Some(60),
                ..JobUpdate::default()
            },
        )
        .await
        .unwrap();
        // A stale writer cannot move progress backwards.
        jobs.update_job(
            "job-1",
            JobUpdate {
                progress: Some(40),
                ..JobUpdate::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(jobs.get_job("job-1").await.unwrap().progress, 60);
    }

    #[tokio::test]
    async fn terminal_states_are_immutable() {
        let jobs = store();
        jobs.create_job("job-1", None, None, serde_json::json!({}))
            .await
            .unwrap();
        jobs.update_job(
            "job-1",
            JobUpdate {
                state: Some(JobState::Completed),
                result: Some(serde_json::json!({"ok": true})),
                ..JobUpdate::default()
            },
        )
        .await
        .unwrap();

        let applied = jobs
            .update_job(
                "job-1",
                JobUpdate {
                    state: Some(JobState::Failed),
                    ..JobUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(!applied);
        let record = jobs.get_job("job-1").await.unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.progress, 100);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn fingerprint_index_finds_completed_jobs() {
        let jobs = store();
        jobs.create_job("job-1", Some("fp-a"), None, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(jobs.find_by_fingerprint("fp-a").await, None);

        jobs.update_job(
            "job-1",
            JobUpdate {
                state: Some(JobState::Completed),
                ..JobUpdate::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(jobs.find_by_fingerprint("fp-a").await.as_deref(), Some("job-1"));
        assert_eq!(jobs.find_by_fingerprint("fp-other").await, None);
    }

    #[tokio::test]
    async fn principal_listing_is_newest_first() {
        let jobs = store();
        for i in 0..3 {
            jobs.create_job(&format!("job-{i}"), None, Some("alice"), serde_json::json!({}))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let listed = jobs.jobs_for_principal("alice", 2, 0).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "job-2");
        assert_eq!(listed[1].id, "job-1");
    }

    #[tokio::test]
    async fn delete_removes_record_and_indices() {
        let jobs = store();
        jobs.create_job("job-1", Some("fp-a"), Some("alice"), serde_json::json!({}))
            .await
            .unwrap();
        assert!(jobs.delete_job("job-1").await);
        assert!(jobs.get_job("job-1").await.is_none());
        assert_eq!(jobs.find_by_fingerprint("fp-a").await, None);
        assert!(jobs.jobs_for_principal("alice", 10, 0).await.is_empty());
    }

    #[tokio::test]
    async fn delete_leaves_same_instant_siblings_indexed() {
        let jobs = store();
        // Created back to back, the two jobs can share a creation
        // timestamp; deleting one must not strip the other from the
        // principal index.
        jobs.create_job("job-a", Some("fp-a"), Some("alice"), serde_json::json!({}))
            .await
            .unwrap();
        jobs.create_job("job-b", Some("fp-b"), Some("alice"), serde_json::json!({}))
            .await
            .unwrap();

        assert!(jobs.delete_job("job-a").await);

        let listed = jobs.jobs_for_principal("alice", 10, 0).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "job-b");
        assert!(jobs.get_job("job-b").await.is_some());
    }

    #[tokio::test]
    async fn stats_count_by_state() {
        let jobs = store();
        jobs.create_job("job-1", None, None, serde_json::json!({}))
            .await
            .unwrap();
        jobs.create_job("job-2", None, None, serde_json::json!({}))
            .await
            .unwrap();
        jobs.update_job(
            "job-2",
            JobUpdate {
                state: Some(JobState::Failed),
                error: Some("boom".into()),
                ..JobUpdate::default()
            },
        )
        .await
        .unwrap();
        let stats = jobs.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.failed, 1);
    }
}
