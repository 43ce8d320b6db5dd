//! Cache Counter Protocol (C3, §4.3). Pipeline-scoped counters and the
//! enqueued-task-name list, mutated only through the two atomic
//! primitives `set` and `update`. Advisory persistence: the cache holds
//! live coordination state, the store (C2) holds the durable fallback.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::model::{JobId, PipelineId, Status};

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Int(i64),
    List(Vec<String>),
    Str(String),
}

/// Boxed so `update` stays object-safe (`Cache` is used as `Arc<dyn
/// Cache>` throughout `job`/`pipeline`).
pub type UpdateFn = Box<dyn FnOnce(Option<CacheValue>) -> CacheValue + Send>;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError>;
    /// Unconditional write (§4.3).
    async fn set(&self, key: &str, value: CacheValue) -> Result<(), CacheError>;
    /// Applies `f(current_or_none) -> new` atomically w.r.t. other
    /// updaters of the same key (§4.3, §5 "the cache's atomic
    /// `update(key, fn)` serializes concurrent counter and list
    /// mutations").
    async fn update(&self, key: &str, f: UpdateFn) -> Result<CacheValue, CacheError>;
}

pub fn status_key(pipeline_id: PipelineId, job_id: JobId) -> String {
    format!("{pipeline_id}_{job_id}_status")
}

pub fn enqueued_tasks_key(pipeline_id: PipelineId, job_id: JobId) -> String {
    format!("{pipeline_id}_{job_id}_enqueued_tasks")
}

pub fn list_of_tasks_enqueued_key(pipeline_id: PipelineId) -> String {
    format!("{pipeline_id}_list_of_tasks_enqueued")
}

pub fn failed_jobs_key(pipeline_id: PipelineId) -> String {
    format!("{pipeline_id}_failed_jobs")
}

pub fn remaining_jobs_key(pipeline_id: PipelineId) -> String {
    format!("{pipeline_id}_remaining_jobs")
}

fn as_int(value: &CacheValue) -> i64 {
    match value {
        CacheValue::Int(n) => *n,
        _ => 0,
    }
}

/// `increment(key, db_seed)`: `current+1` if present, else `db_seed+1`
/// if `db_seed` is nonzero, else `1` (§4.3).
pub async fn increment(cache: &dyn Cache, key: &str, db_seed: i64) -> Result<i64, CacheError> {
    let result = cache
        .update(
            key,
            Box::new(move |current| {
                let n = match current {
                    Some(CacheValue::Int(n)) => n + 1,
                    _ => {
                        if db_seed != 0 {
                            db_seed + 1
                        } else {
                            1
                        }
                    }
                };
                CacheValue::Int(n)
            }),
        )
        .await?;
    Ok(as_int(&result))
}

/// `decrement(key, db_seed)`: `current-1` if present, else `db_seed-1`
/// if `db_seed` is nonzero, else `0` (§4.3), clamped at zero — §5
/// "Idempotence": decrementing an already-zero counter on a duplicate
/// callback delivery is a no-op, not a negative count.
pub async fn decrement(cache: &dyn Cache, key: &str, db_seed: i64) -> Result<i64, CacheError> {
    let result = cache
        .update(
            key,
            Box::new(move |current| {
                let n = match current {
                    Some(CacheValue::Int(n)) => n - 1,
                    _ => {
                        if db_seed != 0 {
                            db_seed - 1
                        } else {
                            0
                        }
                    }
                };
                CacheValue::Int(n.max(0))
            }),
        )
        .await?;
    Ok(as_int(&result))
}

pub async fn list_append(cache: &dyn Cache, key: &str, item: String) -> Result<(), CacheError> {
    cache
        .update(
            key,
            Box::new(move |current| {
                let mut list = match current {
                    Some(CacheValue::List(list)) => list,
                    _ => Vec::new(),
                };
                list.push(item);
                CacheValue::List(list)
            }),
        )
        .await?;
    Ok(())
}

/// Removing a name not present is a no-op (§5 "Idempotence").
pub async fn list_remove(cache: &dyn Cache, key: &str, item: &str) -> Result<(), CacheError> {
    let item = item.to_string();
    cache
        .update(
            key,
            Box::new(move |current| {
                let mut list = match current {
                    Some(CacheValue::List(list)) => list,
                    _ => Vec::new(),
                };
                list.retain(|existing| existing != &item);
                CacheValue::List(list)
            }),
        )
        .await?;
    Ok(())
}

/// Reads the job's effective status from the cache, falling back to
/// `persisted` on a cache miss or cache failure (§3, §7 "CacheFailure
/// degrades to database fallback for reads").
pub async fn effective_status(
    cache: &dyn Cache,
    pipeline_id: PipelineId,
    job_id: JobId,
    persisted: Status,
) -> Status {
    match cache.get(&status_key(pipeline_id, job_id)).await {
        Ok(Some(CacheValue::Str(s))) => s.parse().unwrap_or(persisted),
        _ => persisted,
    }
}

pub async fn set_status(
    cache: &dyn Cache,
    pipeline_id: PipelineId,
    job_id: JobId,
    status: Status,
) -> Result<(), CacheError> {
    cache
        .set(
            &status_key(pipeline_id, job_id),
            CacheValue::Str(status.as_str().to_string()),
        )
        .await
}

/// In-memory [`Cache`] used by tests; a single `RwLock` over the whole
/// map serializes `update` the same way a real cache's per-key CAS loop
/// would.
#[derive(Default)]
pub struct InMemoryCache {
    inner: RwLock<HashMap<String, CacheValue>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        self.inner.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn update(&self, key: &str, f: UpdateFn) -> Result<CacheValue, CacheError> {
        let mut guard = self.inner.write().await;
        let current = guard.get(key).cloned();
        let new_value = f(current);
        guard.insert(key.to_string(), new_value.clone());
        Ok(new_value)
    }
}
