//! Layered key/value cache with an in-process fallback.
//!
//! Keys are `<layer>:<sub-key>`; the layer prefix namespaces OCR results,
//! fuzzy matches, catalogue records, jobs, idempotency state, and the
//! rate-limit windows. The store always carries a bounded in-process map;
//! when a remote backend is configured (feature `backend-redis`) it is
//! preferred, and any backend failure transparently degrades to the map.
//! Readers must treat misses as authoritative negatives: entries survive at
//! least their TTL but may be evicted earlier under pressure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache value error: {0}")]
    Value(String),
}

/// TTL probe outcome, mirroring the remote store's TTL semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    Missing,
    Persistent,
    Expiring(Duration),
}

/// Hash unbounded inputs into fixed-width sub-keys.
pub fn hash_subkey(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Storage operations every backend provides.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool>;
    async fn delete(&self, key: &str) -> CacheResult<bool>;
    async fn exists(&self, key: &str) -> CacheResult<bool>;
    async fn incr_by(&self, key: &str, amount: i64) -> CacheResult<i64>;
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;
    async fn ttl(&self, key: &str) -> CacheResult<TtlState>;
    async fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> CacheResult<()>;
    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;
    async fn srem(&self, key: &str, member: &str) -> CacheResult<()>;
    async fn zadd(&self, key: &str, member: &str, score: f64, ttl: Option<Duration>)
        -> CacheResult<()>;
    async fn zrem(&self, key: &str, member: &str) -> CacheResult<()>;
    async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> CacheResult<Vec<String>>;
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>>;
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<usize>;
    async fn zcard(&self, key: &str) -> CacheResult<usize>;
    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;
}

// ── In-process backend ──────────────────────────────────────────────────

enum MemoryValue {
    Bytes(Vec<u8>),
    Counter(i64),
    Set(HashSet<String>),
    // Sorted ascending by score; member-unique.
    Zset(Vec<(f64, String)>),
}

struct MemoryEntry {
    value: MemoryValue,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

struct MemoryInner {
    entries: HashMap<String, MemoryEntry>,
    insertion_order: VecDeque<String>,
}

/// Bounded in-process map with lazy expiry and oldest-first trimming.
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
    cap: usize,
}

impl MemoryBackend {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
            cap: cap.max(16),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(inner: &mut MemoryInner, cap: usize, key: String, entry: MemoryEntry) {
        if !inner.entries.contains_key(&key) {
            inner.insertion_order.push_back(key.clone());
        }
        inner.entries.insert(key, entry);
        if inner.entries.len() > cap {
            // Shed the oldest tenth; stale order entries are skipped.
            let target = cap - cap / 10;
            while inner.entries.len() > target {
                match inner.insertion_order.pop_front() {
                    Some(old) => {
                        inner.entries.remove(&old);
                    }
                    None => break,
                }
            }
        }
    }

    fn live_entry<'a>(
        inner: &'a mut MemoryInner,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut MemoryEntry> {
        let expired = inner
            .entries
            .get(key)
            .map(|e| e.expired(now))
            .unwrap_or(false);
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.entries.get_mut(key)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut inner = self.lock();
        match MemoryBackend::live_entry(&mut inner, key, now) {
            Some(MemoryEntry {
                value: MemoryValue::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(MemoryEntry {
                value: MemoryValue::Counter(n),
                ..
            }) => Ok(Some(n.to_string().into_bytes())),
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let mut inner = self.lock();
        MemoryBackend::insert(
            &mut inner,
            self.cap,
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Bytes(value),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        let now = Instant::now();
        let mut inner = self.lock();
        if MemoryBackend::live_entry(&mut inner, key, now).is_some() {
            return Ok(false);
        }
        MemoryBackend::insert(
            &mut inner,
            self.cap,
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Bytes(value),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut inner = self.lock();
        Ok(inner.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut inner = self.lock();
        Ok(MemoryBackend::live_entry(&mut inner, key, now).is_some())
    }

    async fn incr_by(&self, key: &str, amount: i64) -> CacheResult<i64> {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(entry) = MemoryBackend::live_entry(&mut inner, key, now) {
            match &mut entry.value {
                MemoryValue::Counter(n) => {
                    *n += amount;
                    return Ok(*n);
                }
                _ => return Err(CacheError::Value(format!("{key} is not a counter"))),
            }
        }
        MemoryBackend::insert(
            &mut inner,
            self.cap,
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Counter(amount),
                expires_at: None,
            },
        );
        Ok(amount)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        let mut inner = self.lock();
        match MemoryBackend::live_entry(&mut inner, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<TtlState> {
        let now = Instant::now();
        let mut inner = self.lock();
        match MemoryBackend::live_entry(&mut inner, key, now) {
            None => Ok(TtlState::Missing),
            Some(MemoryEntry {
                expires_at: None, ..
            }) => Ok(TtlState::Persistent),
            Some(MemoryEntry {
                expires_at: Some(at),
                ..
            }) => Ok(TtlState::Expiring(at.saturating_duration_since(now))),
        }
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(entry) = MemoryBackend::live_entry(&mut inner, key, now) {
            if let MemoryValue::Set(set) = &mut entry.value {
                set.insert(member.to_string());
                if let Some(t) = ttl {
                    entry.expires_at = Some(now + t);
                }
                return Ok(());
            }
            return Err(CacheError::Value(format!("{key} is not a set")));
        }
        let mut set = HashSet::new();
        set.insert(member.to_string());
        MemoryBackend::insert(
            &mut inner,
            self.cap,
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Set(set),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(())
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let mut inner = self.lock();
        match MemoryBackend::live_entry(&mut inner, key, now) {
            Some(MemoryEntry {
                value: MemoryValue::Set(set),
                ..
            }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()> {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(MemoryEntry {
            value: MemoryValue::Set(set),
            ..
        }) = MemoryBackend::live_entry(&mut inner, key, now)
        {
            set.remove(member);
        }
        Ok(())
    }

    async fn zadd(
        &self,
        key: &str,
        member: &str,
        score: f64,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(entry) = MemoryBackend::live_entry(&mut inner, key, now) {
            if let MemoryValue::Zset(items) = &mut entry.value {
                items.retain(|(_, m)| m != member);
                let at = items
                    .binary_search_by(|(s, _)| {
                        s.partial_cmp(&score).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap_or_else(|i| i);
                items.insert(at, (score, member.to_string()));
                if let Some(t) = ttl {
                    entry.expires_at = Some(now + t);
                }
                return Ok(());
            }
            return Err(CacheError::Value(format!("{key} is not a sorted set")));
        }
        MemoryBackend::insert(
            &mut inner,
            self.cap,
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Zset(vec![(score, member.to_string())]),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> CacheResult<()> {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(MemoryEntry {
            value: MemoryValue::Zset(items),
            ..
        }) = MemoryBackend::live_entry(&mut inner, key, now)
        {
            items.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let mut inner = self.lock();
        match MemoryBackend::live_entry(&mut inner, key, now) {
            Some(MemoryEntry {
                value: MemoryValue::Zset(items),
                ..
            }) => Ok(items
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .map(|(_, m)| m.clone())
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let mut inner = self.lock();
        match MemoryBackend::live_entry(&mut inner, key, now) {
            Some(MemoryEntry {
                value: MemoryValue::Zset(items),
                ..
            }) => Ok(items
                .iter()
                .filter(|(s, _)| *s >= min && *s <= max)
                .map(|(_, m)| m.clone())
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<usize> {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(MemoryEntry {
            value: MemoryValue::Zset(items),
            ..
        }) = MemoryBackend::live_entry(&mut inner, key, now)
        {
            let before = items.len();
            items.retain(|(s, _)| *s < min || *s > max);
            return Ok(before - items.len());
        }
        Ok(0)
    }

    async fn zcard(&self, key: &str) -> CacheResult<usize> {
        let now = Instant::now();
        let mut inner = self.lock();
        match MemoryBackend::live_entry(&mut inner, key, now) {
            Some(MemoryEntry {
                value: MemoryValue::Zset(items),
                ..
            }) => Ok(items.len()),
            _ => Ok(0),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let mut inner = self.lock();
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }
}

// ── Remote backend (feature-gated) ──────────────────────────────────────

#[cfg(feature = "backend-redis")]
pub mod redis_backend {
    use super::*;
    use redis::AsyncCommands;

    pub struct RedisBackend {
        manager: redis::aio::ConnectionManager,
    }

    impl RedisBackend {
        pub async fn connect(url: &str) -> CacheResult<Self> {
            let client =
                redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
            let manager = client
                .get_connection_manager()
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            Ok(Self { manager })
        }

        fn conn(&self) -> redis::aio::ConnectionManager {
            self.manager.clone()
        }
    }

    fn map_err<E: std::fmt::Display>(e: E) -> CacheError {
        CacheError::Backend(e.to_string())
    }

    #[async_trait]
    impl CacheBackend for RedisBackend {
        async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
            let mut conn = self.conn();
            conn.get(key).await.map_err(map_err)
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
            let mut conn = self.conn();
            match ttl {
                Some(t) => conn
                    .set_ex(key, value, t.as_secs().max(1))
                    .await
                    .map_err(map_err),
                None => conn.set(key, value).await.map_err(map_err),
            }
        }

        async fn set_nx(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> CacheResult<bool> {
            let mut conn = self.conn();
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value).arg("NX");
            if let Some(t) = ttl {
                cmd.arg("PX").arg(t.as_millis() as u64);
            }
            let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(map_err)?;
            Ok(reply.is_some())
        }

        async fn delete(&self, key: &str) -> CacheResult<bool> {
            let mut conn = self.conn();
            let removed: i64 = conn.del(key).await.map_err(map_err)?;
            Ok(removed > 0)
        }

        async fn exists(&self, key: &str) -> CacheResult<bool> {
            let mut conn = self.conn();
            conn.exists(key).await.map_err(map_err)
        }

        async fn incr_by(&self, key: &str, amount: i64) -> CacheResult<i64> {
            let mut conn = self.conn();
            conn.incr(key, amount).await.map_err(map_err)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
            let mut conn = self.conn();
            conn.expire(key, ttl.as_secs() as i64).await.map_err(map_err)
        }

        async fn ttl(&self, key: &str) -> CacheResult<TtlState> {
            let mut conn = self.conn();
            let ttl: i64 = conn.ttl(key).await.map_err(map_err)?;
            Ok(match ttl {
                -2 => TtlState::Missing,
                -1 => TtlState::Persistent,
                secs => TtlState::Expiring(Duration::from_secs(secs.max(0) as u64)),
            })
        }

        async fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> CacheResult<()> {
            let mut conn = self.conn();
            let _: i64 = conn.sadd(key, member).await.map_err(map_err)?;
            if let Some(t) = ttl {
                let _: bool = conn.expire(key, t.as_secs() as i64).await.map_err(map_err)?;
            }
            Ok(())
        }

        async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
            let mut conn = self.conn();
            conn.smembers(key).await.map_err(map_err)
        }

        async fn srem(&self, key: &str, member: &str) -> CacheResult<()> {
            let mut conn = self.conn();
            let _: i64 = conn.srem(key, member).await.map_err(map_err)?;
            Ok(())
        }

        async fn zadd(
            &self,
            key: &str,
            member: &str,
            score: f64,
            ttl: Option<Duration>,
        ) -> CacheResult<()> {
            let mut conn = self.conn();
            let _: i64 = conn.zadd(key, member, score).await.map_err(map_err)?;
            if let Some(t) = ttl {
                let _: bool = conn.expire(key, t.as_secs() as i64).await.map_err(map_err)?;
            }
            Ok(())
        }

        async fn zrem(&self, key: &str, member: &str) -> CacheResult<()> {
            let mut conn = self.conn();
            let _: i64 = conn.zrem(key, member).await.map_err(map_err)?;
            Ok(())
        }

        async fn zrevrange(
            &self,
            key: &str,
            offset: usize,
            limit: usize,
        ) -> CacheResult<Vec<String>> {
            let mut conn = self.conn();
            let stop = offset + limit;
            conn.zrevrange(key, offset as isize, stop as isize - 1)
                .await
                .map_err(map_err)
        }

        async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
            let mut conn = self.conn();
            conn.zrangebyscore(key, min, max).await.map_err(map_err)
        }

        async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<usize> {
            let mut conn = self.conn();
            let removed: i64 = conn.zrembyscore(key, min, max).await.map_err(map_err)?;
            Ok(removed.max(0) as usize)
        }

        async fn zcard(&self, key: &str) -> CacheResult<usize> {
            let mut conn = self.conn();
            let n: i64 = conn.zcard(key).await.map_err(map_err)?;
            Ok(n.max(0) as usize)
        }

        async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
            let mut conn = self.conn();
            let pattern = format!("{prefix}*");
            let mut keys = Vec::new();
            let mut cursor = 0u64;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await
                    .map_err(map_err)?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok(keys)
        }
    }
}

// ── The layered store ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerStats {
    pub hits: u64,
    pub misses: u64,
}

impl LayerStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub layers: HashMap<String, LayerStats>,
}

pub struct CacheStore {
    remote: Option<Arc<dyn CacheBackend>>,
    memory: Arc<MemoryBackend>,
    stats: Mutex<HashMap<String, LayerStats>>,
}

impl CacheStore {
    /// In-process only. The default for tests and single-node deployments.
    pub fn in_memory(cap: usize) -> Self {
        Self {
            remote: None,
            memory: Arc::new(MemoryBackend::new(cap)),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Prefer `remote`, degrading to the in-process map on failure.
    pub fn with_remote(remote: Arc<dyn CacheBackend>, cap: usize) -> Self {
        Self {
            remote: Some(remote),
            memory: Arc::new(MemoryBackend::new(cap)),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to a remote store, falling back to memory-only when the
    /// connection cannot be established.
    #[cfg(feature = "backend-redis")]
    pub async fn connect(url: &str, cap: usize) -> Self {
        match redis_backend::RedisBackend::connect(url).await {
            Ok(backend) => Self::with_remote(Arc::new(backend), cap),
            Err(err) => {
                tracing::warn!(error = %err, "remote cache unreachable, using in-process map");
                Self::in_memory(cap)
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        if self.remote.is_some() {
            "remote"
        } else {
            "memory"
        }
    }

    fn record(&self, key: &str, hit: bool) {
        let layer = key.split(':').next().unwrap_or("other").to_string();
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = stats.entry(layer).or_default();
        if hit {
            entry.hits += 1;
        } else {
            entry.misses += 1;
        }
    }

    pub fn stats(&self) -> CacheStats {
        let stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        CacheStats {
            backend: self.backend_name(),
            layers: stats.clone(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(value) => {
                    self.record(key, value.is_some());
                    return value;
                }
                Err(err) => self.degrade("get", &err),
            }
        }
        let value = self.memory.get(key).await.ok().flatten();
        self.record(key, value.is_some());
        value
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "cache entry failed to deserialize");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        if let Some(remote) = &self.remote {
            match remote.set(key, value.clone(), ttl).await {
                Ok(()) => return,
                Err(err) => self.degrade("set", &err),
            }
        }
        let _ = self.memory.set(key, value, ttl).await;
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, bytes, ttl).await,
            Err(err) => tracing::error!(key, error = %err, "cache value failed to serialize"),
        }
    }

    pub async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> bool {
        if let Some(remote) = &self.remote {
            match remote.set_nx(key, value.clone(), ttl).await {
                Ok(created) => return created,
                Err(err) => self.degrade("set_nx", &err),
            }
        }
        self.memory.set_nx(key, value, ttl).await.unwrap_or(false)
    }

    pub async fn delete(&self, key: &str) -> bool {
        if let Some(remote) = &self.remote {
            match remote.delete(key).await {
                Ok(removed) => return removed,
                Err(err) => self.degrade("delete", &err),
            }
        }
        self.memory.delete(key).await.unwrap_or(false)
    }

    pub async fn exists(&self, key: &str) -> bool {
        if let Some(remote) = &self.remote {
            match remote.exists(key).await {
                Ok(present) => return present,
                Err(err) => self.degrade("exists", &err),
            }
        }
        self.memory.exists(key).await.unwrap_or(false)
    }

    pub async fn incr_by(&self, key: &str, amount: i64) -> i64 {
        if let Some(remote) = &self.remote {
            match remote.incr_by(key, amount).await {
                Ok(value) => return value,
                Err(err) => self.degrade("incr_by", &err),
            }
        }
        self.memory.incr_by(key, amount).await.unwrap_or(0)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        if let Some(remote) = &self.remote {
            match remote.expire(key, ttl).await {
                Ok(applied) => return applied,
                Err(err) => self.degrade("expire", &err),
            }
        }
        self.memory.expire(key, ttl).await.unwrap_or(false)
    }

    pub async fn ttl_state(&self, key: &str) -> TtlState {
        if let Some(remote) = &self.remote {
            match remote.ttl(key).await {
                Ok(state) => return state,
                Err(err) => self.degrade("ttl", &err),
            }
        }
        self.memory.ttl(key).await.unwrap_or(TtlState::Missing)
    }

    pub async fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) {
        if let Some(remote) = &self.remote {
            match remote.sadd(key, member, ttl).await {
                Ok(()) => return,
                Err(err) => self.degrade("sadd", &err),
            }
        }
        let _ = self.memory.sadd(key, member, ttl).await;
    }

    pub async fn smembers(&self, key: &str) -> Vec<String> {
        if let Some(remote) = &self.remote {
            match remote.smembers(key).await {
                Ok(members) => return members,
                Err(err) => self.degrade("smembers", &err),
            }
        }
        self.memory.smembers(key).await.unwrap_or_default()
    }

    pub async fn srem(&self, key: &str, member: &str) {
        if let Some(remote) = &self.remote {
            match remote.srem(key, member).await {
                Ok(()) => return,
                Err(err) => self.degrade("srem", &err),
            }
        }
        let _ = self.memory.srem(key, member).await;
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64, ttl: Option<Duration>) {
        if let Some(remote) = &self.remote {
            match remote.zadd(key, member, score, ttl).await {
                Ok(()) => return,
                Err(err) => self.degrade("zadd", &err),
            }
        }
        let _ = self.memory.zadd(key, member, score, ttl).await;
    }

    pub async fn zrem(&self, key: &str, member: &str) {
        if let Some(remote) = &self.remote {
            match remote.zrem(key, member).await {
                Ok(()) => return,
                Err(err) => self.degrade("zrem", &err),
            }
        }
        let _ = self.memory.zrem(key, member).await;
    }

    pub async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> Vec<String> {
        if let Some(remote) = &self.remote {
            match remote.zrevrange(key, offset, limit).await {
                Ok(members) => return members,
                Err(err) => self.degrade("zrevrange", &err),
            }
        }
        self.memory
            .zrevrange(key, offset, limit)
            .await
            .unwrap_or_default()
    }

    pub async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Vec<String> {
        if let Some(remote) = &self.remote {
            match remote.zrangebyscore(key, min, max).await {
                Ok(members) => return members,
                Err(err) => self.degrade("zrangebyscore", &err),
            }
        }
        self.memory
            .zrangebyscore(key, min, max)
            .await
            .unwrap_or_default()
    }

    pub async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> usize {
        if let Some(remote) = &self.remote {
            match remote.zremrangebyscore(key, min, max).await {
                Ok(removed) => return removed,
                Err(err) => self.degrade("zremrangebyscore", &err),
            }
        }
        self.memory
            .zremrangebyscore(key, min, max)
            .await
            .unwrap_or(0)
    }

    pub async fn zcard(&self, key: &str) -> usize {
        if let Some(remote) = &self.remote {
            match remote.zcard(key).await {
                Ok(count) => return count,
                Err(err) => self.degrade("zcard", &err),
            }
        }
        self.memory.zcard(key).await.unwrap_or(0)
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        if let Some(remote) = &self.remote {
            match remote.scan_prefix(prefix).await {
                Ok(keys) => return keys,
                Err(err) => self.degrade("scan", &err),
            }
        }
        self.memory.scan_prefix(prefix).await.unwrap_or_default()
    }

    fn degrade(&self, op: &'static str, err: &CacheError) {
        tracing::warn!(op, error = %err, "remote cache operation failed, using in-process map");
    }
}
