//! Idempotent execution protocol.
//!
//! One pipeline execution per idempotency key: read the cached result,
//! take a distributed lock with auto-release, re-check, run, cache success
//! only. Lock acquisition waits a bounded time; losing the race degrades to
//! a logged lock-free execution rather than an error, because duplicated
//! work is preferable to refusing the request. Failures are never cached.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::CacheStore;
use crate::config::IdempotencyConfig;
use crate::error::Result;
use crate::fingerprint::IdempotencyKey;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ExecutionOutcome<T> {
    pub value: T,
    pub from_cache: bool,
}

pub struct IdempotentExecutor {
    cache: Arc<CacheStore>,
    lock_ttl: Duration,
    block_wait: Duration,
}

impl IdempotentExecutor {
    pub fn new(cache: Arc<CacheStore>, config: &IdempotencyConfig) -> Self {
        Self {
            cache,
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            block_wait: Duration::from_secs(config.block_wait_secs),
        }
    }

    fn result_key(key: &IdempotencyKey) -> String {
        format!("idem:{}", key.result_key())
    }

    fn lock_key(key: &IdempotencyKey) -> String {
        format!("idem:{}", key.lock_key())
    }

    /// Run `work` at most once per key, returning the cached value on
    /// subsequent calls within `result_ttl`.
    pub async fn execute<T, F, Fut>(
        &self,
        key: &IdempotencyKey,
        result_ttl: Duration,
        work: F,
    ) -> Result<ExecutionOutcome<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result_key = Self::result_key(key);
        if let Some(value) = self.cache.get_json::<T>(&result_key).await {
            tracing::info!(key = key.as_str(), "idempotency cache hit");
            return Ok(ExecutionOutcome {
                value,
                from_cache: true,
            });
        }

        let lock_key = Self::lock_key(key);
        let token = uuid::Uuid::new_v4().to_string();
        let locked = self.acquire_lock(&lock_key, &token).await;

        if locked {
            // Another worker may have finished while we waited on the lock.
            if let Some(value) = self.cache.get_json::<T>(&result_key).await {
                self.release_lock(&lock_key, &token).await;
                return Ok(ExecutionOutcome {
                    value,
                    from_cache: true,
                });
            }
        } else {
            // Lock holder is still running; give it one more beat, then
            // proceed without the lock rather than failing the request.
            tokio::time::sleep(Duration::from_secs(1)).await;
            if let Some(value) = self.cache.get_json::<T>(&result_key).await {
                return Ok(ExecutionOutcome {
                    value,
                    from_cache: true,
                });
            }
            tracing::warn!(key = key.as_str(), "proceeding without idempotency lock");
        }

        let outcome = work().await;
        match outcome {
            Ok(value) => {
                self.cache
                    .set_json(&result_key, &value, Some(result_ttl))
                    .await;
                if locked {
                    self.release_lock(&lock_key, &token).await;
                }
                Ok(ExecutionOutcome {
                    value,
                    from_cache: false,
                })
            }
            Err(err) => {
                // Failures are never cached at the result layer.
                if locked {
                    self.release_lock(&lock_key, &token).await;
                }
                Err(err)
            }
        }
    }

    async fn acquire_lock(&self, lock_key: &str, token: &str) -> bool {
        let deadline = Instant::now() + self.block_wait;
        loop {
            if self
                .cache
                .set_nx(lock_key, token.as_bytes().to_vec(), Some(self.lock_ttl))
                .await
            {
                tracing::debug!(lock_key, "idempotency lock acquired");
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!(lock_key, "idempotency lock acquisition timed out");
                return false;
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    /// Compare-and-delete so an expired lock taken over by another worker
    /// is not stolen back.
    async fn release_lock(&self, lock_key: &str, token: &str) {
        if let Some(current) = self.cache.get(lock_key).await {
            if current == token.as_bytes() {
                self.cache.delete(lock_key).await;
            }
        }
    }
}
