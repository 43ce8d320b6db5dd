//! Facade wiring C2–C7 behind the operations an HTTP/CLI/worker-callback
//! surface would call, the way `ob-workflow::engine::WorkflowEngine` wires
//! `WorkflowRepository` + `GuardEvaluator` behind `start_workflow`/
//! `try_advance`/`transition`. No binary in this workspace depends on it
//! yet; it is the seam one would.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;

use crate::cache::Cache;
use crate::error::PipelineError;
use crate::import::{self, PipelineDescriptor};
use crate::job::{self, Deps};
use crate::model::{Job, JobId, Pipeline, PipelineId, StartCondition};
use crate::notify::Notifier;
use crate::pipeline;
use crate::queue::TaskQueue;
use crate::store::{NewJob, NewPipeline, NewStartCondition, PipelineStore};

/// Reactive poll cadence for a scheduler front-end driving
/// [`PipelineEngine::start_pipeline`] off `Schedule` rows — named after
/// `ob-workflow::listener::POLL_INTERVAL_MS`. Unused by this crate itself,
/// since the scheduler front-end is a Non-goal (§1); kept as the tunable a
/// caller's poll loop would reach for.
pub const POLL_INTERVAL_MS: u64 = 2_000;
/// Backoff after a store/cache/queue error before the next poll, named
/// after `ob-workflow::listener::ERROR_BACKOFF_MS`.
pub const ERROR_BACKOFF_MS: u64 = 10_000;

pub struct PipelineEngine {
    store: Arc<dyn PipelineStore>,
    cache: Arc<dyn Cache>,
    queue: Arc<dyn TaskQueue>,
    notifier: Arc<dyn Notifier>,
}

impl PipelineEngine {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        cache: Arc<dyn Cache>,
        queue: Arc<dyn TaskQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            notifier,
        }
    }

    fn deps(&self) -> Deps<'_> {
        Deps {
            store: self.store.as_ref(),
            cache: self.cache.as_ref(),
            queue: self.queue.as_ref(),
            notifier: self.notifier.as_ref(),
        }
    }

    pub async fn create_pipeline(&self, new: NewPipeline) -> Result<Pipeline, PipelineError> {
        Ok(self.store.create_pipeline(new).await?)
    }

    pub async fn create_job(&self, new: NewJob) -> Result<Job, PipelineError> {
        Ok(self.store.create_job(new).await?)
    }

    /// Adds a start-condition edge, rejecting it if it would make the
    /// pipeline's edge set cyclic (§3 invariant: the start-condition graph
    /// is a DAG). The adapter (C2) itself performs no such validation —
    /// that's this facade's job, matching how `bpmn-lite-core::compiler::
    /// verifier` runs `petgraph::visit::Dfs` over a definition before a
    /// `WorkflowEngine` will accept it.
    pub async fn add_start_condition(
        &self,
        pipeline_id: PipelineId,
        new: NewStartCondition,
    ) -> Result<StartCondition, PipelineError> {
        let mut existing = self.store.start_conditions_for_pipeline(pipeline_id).await?;
        existing.push(StartCondition {
            id: 0,
            job_id: new.job_id,
            preceding_job_id: new.preceding_job_id,
            condition: new.condition,
        });
        if is_cyclic(&existing) {
            return Err(PipelineError::MalformedGraph {
                pipeline_id,
                message: format!(
                    "adding edge {} -> {} would create a cycle",
                    new.preceding_job_id, new.job_id
                ),
            });
        }
        Ok(self.store.create_start_condition(new).await?)
    }

    pub async fn start_pipeline(&self, pipeline_id: PipelineId) -> Result<bool, PipelineError> {
        pipeline::start(&self.deps(), pipeline_id).await
    }

    pub async fn stop_pipeline(&self, pipeline_id: PipelineId) -> Result<bool, PipelineError> {
        pipeline::stop(&self.deps(), pipeline_id).await
    }

    pub async fn start_single_job(&self, pipeline_id: PipelineId, job_id: JobId) -> Result<(), PipelineError> {
        pipeline::start_single_job(&self.deps(), pipeline_id, job_id).await
    }

    pub async fn stop_job(&self, job_id: JobId) -> Result<bool, PipelineError> {
        job::stop(&self.deps(), job_id).await
    }

    /// Worker callback: a task named `task_name` for `job_id` completed.
    pub async fn worker_succeeded(&self, job_id: JobId, task_name: &str) -> Result<(), PipelineError> {
        job::worker_succeeded(&self.deps(), job_id, task_name).await
    }

    /// Worker callback: a task named `task_name` for `job_id` failed.
    pub async fn worker_failed(&self, job_id: JobId, task_name: &str) -> Result<(), PipelineError> {
        job::worker_failed(&self.deps(), job_id, task_name).await
    }

    pub async fn import_pipeline(
        &self,
        pipeline_id: PipelineId,
        descriptor: &PipelineDescriptor,
    ) -> Result<(), PipelineError> {
        import::import_pipeline(self.store.as_ref(), pipeline_id, descriptor).await
    }

    pub async fn export_pipeline(&self, pipeline_id: PipelineId) -> Result<PipelineDescriptor, PipelineError> {
        import::export_pipeline(self.store.as_ref(), pipeline_id).await
    }
}

fn is_cyclic(edges: &[StartCondition]) -> bool {
    let mut graph = DiGraph::<JobId, ()>::new();
    let mut nodes = HashMap::new();
    for sc in edges {
        let from = *nodes
            .entry(sc.preceding_job_id)
            .or_insert_with(|| graph.add_node(sc.preceding_job_id));
        let to = *nodes.entry(sc.job_id).or_insert_with(|| graph.add_node(sc.job_id));
        graph.add_edge(from, to, ());
    }
    is_cyclic_directed(&graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::model::ConditionKind;
    use crate::notify::LoggingNotifier;
    use crate::queue::InMemoryQueue;
    use crate::store_memory::MemoryStore;

    fn engine() -> PipelineEngine {
        PipelineEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryQueue::new()),
            Arc::new(LoggingNotifier),
        )
    }

    #[tokio::test]
    async fn add_start_condition_rejects_a_cycle() {
        let engine = engine();
        let pipeline = engine
            .create_pipeline(NewPipeline {
                name: "p".into(),
                emails_for_notifications: String::new(),
                run_on_schedule: false,
            })
            .await
            .unwrap();
        let a = engine
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "a".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();
        let b = engine
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "b".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();

        engine
            .add_start_condition(
                pipeline.id,
                NewStartCondition {
                    job_id: b.id,
                    preceding_job_id: a.id,
                    condition: ConditionKind::Success,
                },
            )
            .await
            .unwrap();

        let err = engine
            .add_start_condition(
                pipeline.id,
                NewStartCondition {
                    job_id: a.id,
                    preceding_job_id: b.id,
                    condition: ConditionKind::Success,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedGraph { .. }));
    }

    #[tokio::test]
    async fn start_pipeline_through_the_facade_dispatches_the_source_job() {
        let engine = engine();
        let pipeline = engine
            .create_pipeline(NewPipeline {
                name: "p".into(),
                emails_for_notifications: String::new(),
                run_on_schedule: false,
            })
            .await
            .unwrap();
        engine
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "only".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();

        assert!(engine.start_pipeline(pipeline.id).await.unwrap());
    }
}
