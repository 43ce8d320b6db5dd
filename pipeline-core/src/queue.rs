//! Dispatch Bridge outbound half (C7, §4.4 `enqueue`, §6 "Task queue
//! contract"). `TaskQueue` is a thin submission contract; the worker
//! side and its callback delivery are represented only by the
//! `worker_succeeded`/`worker_failed` entry points on [`crate::job`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::QueueError;
use crate::model::JobId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub target: String,
    pub name: String,
    pub url: String,
    pub job_id: JobId,
    pub worker_class: String,
    pub worker_params: JsonValue,
    pub task_name: String,
    pub countdown: i64,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submits a task under a globally unique name (§5 "Idempotence").
    /// Returns `Ok(true)` for a fresh submission, `Ok(false)` if `name`
    /// was already submitted — the queue's named-task deduplication
    /// treats a duplicate as success rather than `QueueFailure` (§7
    /// "DuplicateTask").
    async fn submit(&self, submission: TaskSubmission) -> Result<bool, QueueError>;
}

/// Maps any character outside `[A-Za-z0-9_-]` to `-` (§4.4 `enqueue`).
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Mints `sanitize(pipeline.name + "_" + job.name + "_" + worker_class)
/// + "_" + UUID` (§4.4).
pub fn mint_task_name(pipeline_name: &str, job_name: &str, worker_class: &str) -> String {
    let base = sanitize(&format!("{pipeline_name}_{job_name}_{worker_class}"));
    format!("{base}_{}", Uuid::new_v4())
}

/// In-memory [`TaskQueue`] used by tests; records every submission so
/// scenario tests can assert on dispatch order/payloads.
#[derive(Default)]
pub struct InMemoryQueue {
    seen_names: Mutex<HashSet<String>>,
    submissions: Mutex<Vec<TaskSubmission>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submissions(&self) -> Vec<TaskSubmission> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn submit(&self, submission: TaskSubmission) -> Result<bool, QueueError> {
        let mut seen = self.seen_names.lock().await;
        let fresh = seen.insert(submission.name.clone());
        if fresh {
            self.submissions.lock().await.push(submission);
        }
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize("a b.c/d"), "a-b-c-d");
        assert_eq!(sanitize("already-valid_123"), "already-valid_123");
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected_but_not_an_error() {
        let queue = InMemoryQueue::new();
        let submission = TaskSubmission {
            target: "job-service".into(),
            name: "dup".into(),
            url: "/task".into(),
            job_id: 1,
            worker_class: "Worker".into(),
            worker_params: serde_json::json!({}),
            task_name: "dup".into(),
            countdown: 0,
        };
        assert!(queue.submit(submission.clone()).await.unwrap());
        assert!(!queue.submit(submission).await.unwrap());
        assert_eq!(queue.submissions().await.len(), 1);
    }
}
