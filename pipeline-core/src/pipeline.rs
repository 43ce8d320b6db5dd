//! Pipeline State Machine (C5, §4.5). Operates over the same [`job::Deps`]
//! bundle `job` uses, since `start`/`stop`/`job_finished` all need to
//! drive every owned job through C4.

use std::collections::HashSet;

use chrono::Utc;

use crate::cache::{self, CacheValue};
use crate::error::PipelineError;
use crate::job::{self, Deps};
use crate::model::{JobId, PipelineId, Status};

/// §4.5 `get_ready`: reset the pipeline-scoped counters.
pub async fn get_ready(deps: &Deps<'_>, pipeline_id: PipelineId) -> Result<(), PipelineError> {
    let jobs = deps.store.jobs_for_pipeline(pipeline_id).await?;
    deps.cache
        .set(&cache::failed_jobs_key(pipeline_id), CacheValue::Int(0))
        .await?;
    deps.cache
        .set(
            &cache::remaining_jobs_key(pipeline_id),
            CacheValue::Int(jobs.len() as i64),
        )
        .await?;
    deps.cache
        .set(
            &cache::list_of_tasks_enqueued_key(pipeline_id),
            CacheValue::List(Vec::new()),
        )
        .await?;
    Ok(())
}

/// §4.5 `start`.
pub async fn start(deps: &Deps<'_>, pipeline_id: PipelineId) -> Result<bool, PipelineError> {
    let mut pipeline = deps.store.get_pipeline(pipeline_id).await?;
    if !pipeline.is_startable_from() {
        return Ok(false);
    }

    let jobs = deps.store.jobs_for_pipeline(pipeline_id).await?;
    if !crate::model::Pipeline::has_jobs(&jobs) {
        return Ok(false);
    }
    for j in &jobs {
        let effective = cache::effective_status(deps.cache, pipeline_id, j.id, j.status).await;
        if !matches!(effective, Status::Idle | Status::Succeeded | Status::Failed) {
            return Ok(false);
        }
    }

    get_ready(deps, pipeline_id).await?;

    for j in &jobs {
        if !job::get_ready(deps, j.id).await? {
            return Ok(false);
        }
    }
    for j in &jobs {
        // Benign `false` returns (predecessor not yet terminal) are
        // expected here and retried reactively via §4.6.
        job::start(deps, j.id).await?;
    }

    pipeline.status = Status::Running;
    pipeline.status_changed_at = Utc::now();
    deps.store.save_pipeline(&pipeline).await?;
    Ok(true)
}

/// §4.5 `stop`.
pub async fn stop(deps: &Deps<'_>, pipeline_id: PipelineId) -> Result<bool, PipelineError> {
    let pipeline = deps.store.get_pipeline(pipeline_id).await?;
    if pipeline.status != Status::Running {
        return Ok(false);
    }

    let jobs = deps.store.jobs_for_pipeline(pipeline_id).await?;
    for j in &jobs {
        job::stop(deps, j.id).await?;
    }

    let mut any_nonterminal = false;
    for j in &jobs {
        let effective = cache::effective_status(deps.cache, pipeline_id, j.id, j.status).await;
        if !effective.is_terminal() {
            any_nonterminal = true;
            break;
        }
    }

    if any_nonterminal {
        let mut pipeline = pipeline;
        pipeline.status = Status::Stopping;
        pipeline.status_changed_at = Utc::now();
        deps.store.save_pipeline(&pipeline).await?;
        Ok(true)
    } else {
        finish(deps, pipeline_id).await?;
        Ok(true)
    }
}

/// §4.5 `start_single_job`: bypasses DAG gating for an operator-initiated
/// single-job run.
pub async fn start_single_job(
    deps: &Deps<'_>,
    pipeline_id: PipelineId,
    job_id: JobId,
) -> Result<(), PipelineError> {
    let mut pipeline = deps.store.get_pipeline(pipeline_id).await?;
    pipeline.status = Status::Running;
    pipeline.status_changed_at = Utc::now();
    deps.store.save_pipeline(&pipeline).await?;
    job::run(deps, job_id).await
}

/// §4.5 `job_finished`, invoked by `job::start_dependent_jobs` after a
/// job reaches a terminal effective status. A no-op if the pipeline has
/// already finished: cascading edge-violation propagation can call this
/// more than once for the same terminal transition (each job along the
/// cascade runs its own `start_dependent_jobs` and calls `job_finished`
/// at the end of it), and without this guard `_finish` — and the
/// notifier it drives — would fire once per cascaded job instead of once
/// per pipeline.
pub async fn job_finished(deps: &Deps<'_>, pipeline_id: PipelineId) -> Result<(), PipelineError> {
    let pipeline = deps.store.get_pipeline(pipeline_id).await?;
    if pipeline.status.is_terminal() {
        return Ok(());
    }

    let jobs = deps.store.jobs_for_pipeline(pipeline_id).await?;
    for j in &jobs {
        let effective = cache::effective_status(deps.cache, pipeline_id, j.id, j.status).await;
        if !matches!(effective, Status::Succeeded | Status::Failed | Status::Idle) {
            return Ok(());
        }
    }
    finish(deps, pipeline_id).await
}

/// §4.5 `_finish`: aggregate over sink jobs, persist, notify.
pub(crate) async fn finish(deps: &Deps<'_>, pipeline_id: PipelineId) -> Result<(), PipelineError> {
    let jobs = deps.store.jobs_for_pipeline(pipeline_id).await?;
    let start_conditions = deps.store.start_conditions_for_pipeline(pipeline_id).await?;
    let preceding_ids: HashSet<JobId> = start_conditions.iter().map(|sc| sc.preceding_job_id).collect();
    let sinks = jobs.iter().filter(|j| !preceding_ids.contains(&j.id));

    let mut outcome = Status::Succeeded;
    for sink in sinks {
        let effective = cache::effective_status(deps.cache, pipeline_id, sink.id, sink.status).await;
        if effective == Status::Failed {
            outcome = Status::Failed;
            break;
        }
    }

    let mut pipeline = deps.store.get_pipeline(pipeline_id).await?;
    pipeline.status = outcome;
    pipeline.status_changed_at = Utc::now();
    deps.store.save_pipeline(&pipeline).await?;
    deps.notifier.finished_pipeline(&pipeline).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::model::ConditionKind;
    use crate::notify::LoggingNotifier;
    use crate::queue::InMemoryQueue;
    use crate::store::{NewJob, NewPipeline, NewStartCondition};
    use crate::store_memory::MemoryStore;

    async fn linear_pipeline(store: &MemoryStore) -> (PipelineId, JobId, JobId, JobId) {
        let pipeline = store
            .create_pipeline(NewPipeline {
                name: "p".into(),
                emails_for_notifications: "ops@example.com".into(),
                run_on_schedule: false,
            })
            .await
            .unwrap();
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let job = store
                .create_job(NewJob {
                    pipeline_id: pipeline.id,
                    name: name.into(),
                    worker_class: "Worker".into(),
                })
                .await
                .unwrap();
            ids.push(job.id);
        }
        store
            .create_start_condition(NewStartCondition {
                job_id: ids[1],
                preceding_job_id: ids[0],
                condition: ConditionKind::Success,
            })
            .await
            .unwrap();
        store
            .create_start_condition(NewStartCondition {
                job_id: ids[2],
                preceding_job_id: ids[1],
                condition: ConditionKind::Success,
            })
            .await
            .unwrap();
        (pipeline.id, ids[0], ids[1], ids[2])
    }

    #[tokio::test]
    async fn linear_success_scenario_one() {
        let store = MemoryStore::new();
        let cache = InMemoryCache::new();
        let queue = InMemoryQueue::new();
        let notifier = LoggingNotifier;
        let (pipeline_id, a, b, c) = linear_pipeline(&store).await;
        let deps = Deps {
            store: &store,
            cache: &cache,
            queue: &queue,
            notifier: &notifier,
        };

        assert!(start(&deps, pipeline_id).await.unwrap());

        // Only A should have dispatched; B and C are gated on predecessors.
        assert_eq!(queue.submissions().await.len(), 1);
        let task_a = queue.submissions().await[0].task_name.clone();
        job::worker_succeeded(&deps, a, &task_a).await.unwrap();

        assert_eq!(queue.submissions().await.len(), 2);
        let task_b = queue.submissions().await[1].task_name.clone();
        job::worker_succeeded(&deps, b, &task_b).await.unwrap();

        assert_eq!(queue.submissions().await.len(), 3);
        let task_c = queue.submissions().await[2].task_name.clone();
        job::worker_succeeded(&deps, c, &task_c).await.unwrap();

        let pipeline = store.get_pipeline(pipeline_id).await.unwrap();
        assert_eq!(pipeline.status, Status::Succeeded);
        for job_id in [a, b, c] {
            assert_eq!(store.get_job(job_id).await.unwrap().status, Status::Succeeded);
        }
        assert_eq!(
            cache
                .get(&cache::failed_jobs_key(pipeline_id))
                .await
                .unwrap(),
            Some(CacheValue::Int(0))
        );
        assert_eq!(
            cache
                .get(&cache::remaining_jobs_key(pipeline_id))
                .await
                .unwrap(),
            Some(CacheValue::Int(0))
        );
    }

    #[tokio::test]
    async fn failure_stops_downstream_scenario_two() {
        let store = MemoryStore::new();
        let cache = InMemoryCache::new();
        let queue = InMemoryQueue::new();
        let notifier = LoggingNotifier;
        let pipeline = store
            .create_pipeline(NewPipeline {
                name: "p".into(),
                emails_for_notifications: String::new(),
                run_on_schedule: false,
            })
            .await
            .unwrap();
        let a = store
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "a".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();
        let b = store
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "b".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();
        store
            .create_start_condition(NewStartCondition {
                job_id: b.id,
                preceding_job_id: a.id,
                condition: ConditionKind::Success,
            })
            .await
            .unwrap();

        let deps = Deps {
            store: &store,
            cache: &cache,
            queue: &queue,
            notifier: &notifier,
        };
        start(&deps, pipeline.id).await.unwrap();
        let task_a = queue.submissions().await[0].task_name.clone();
        job::worker_failed(&deps, a.id, &task_a).await.unwrap();

        assert_eq!(store.get_job(a.id).await.unwrap().status, Status::Failed);
        assert_eq!(store.get_job(b.id).await.unwrap().status, Status::Failed);
        assert_eq!(
            store.get_pipeline(pipeline.id).await.unwrap().status,
            Status::Failed
        );
        // B was never dispatched.
        assert_eq!(queue.submissions().await.len(), 1);
    }
}
