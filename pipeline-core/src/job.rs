//! Job State Machine (C4, §4.4). Operations are free functions over a
//! borrowed [`Deps`] bundle rather than methods on `Job` itself — every
//! call re-reads the row it needs from the store, so there is no
//! in-process object graph to keep consistent across concurrent
//! callers, matching §5's "any mutator must re-read effective status
//! from C3 before acting".

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::cache::{self, Cache};
use crate::error::PipelineError;
use crate::model::{JobId, Number, ParamValue, Status};
use crate::notify::Notifier;
use crate::param;
use crate::pipeline;
use crate::queue::{self, TaskQueue, TaskSubmission};
use crate::store::PipelineStore;

/// The store/cache/queue/notifier a job or pipeline operation needs.
/// Bundled so recursive calls (`start` → `start_dependent_jobs` →
/// `start`) don't have to thread four parameters individually.
pub struct Deps<'a> {
    pub store: &'a dyn PipelineStore,
    pub cache: &'a dyn Cache,
    pub queue: &'a dyn TaskQueue,
    pub notifier: &'a dyn Notifier,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// §4.4 `prepare_for_start`.
pub async fn prepare_for_start(deps: &Deps<'_>, job_id: JobId) -> Result<bool, PipelineError> {
    let job = deps.store.get_job(job_id).await?;
    let effective = cache::effective_status(deps.cache, job.pipeline_id, job_id, job.status).await;
    if !matches!(effective, Status::Idle | Status::Succeeded | Status::Failed) {
        return Ok(false);
    }
    cache::set_status(deps.cache, job.pipeline_id, job_id, Status::Waiting).await?;
    Ok(true)
}

/// §4.4 `get_ready`: pre-materialize every param so a `BadExpression` or
/// type error surfaces now rather than mid-dispatch.
pub async fn get_ready(deps: &Deps<'_>, job_id: JobId) -> Result<bool, PipelineError> {
    let job = deps.store.get_job(job_id).await?;
    let globals = deps.store.global_params().await?;
    let pipeline_params = deps.store.params_for_pipeline(job.pipeline_id).await?;
    let job_params = deps.store.params_for_job(job_id).await?;

    for p in &job_params {
        if let Err(err) = param::resolve(p, &globals, &pipeline_params) {
            tracing::error!(
                pipeline_id = job.pipeline_id,
                job_id = job.id,
                worker_class = %job.worker_class,
                error = %err,
                "param evaluation failed, aborting job start"
            );
            return Ok(false);
        }
    }

    prepare_for_start(deps, job_id).await
}

/// §4.4 `start`. Recursive through `start_dependent_jobs`, so it returns
/// a boxed future the way `ob-workflow::engine::WorkflowEngine::
/// try_advance` boxes its own recursive call.
pub fn start<'a>(deps: &'a Deps<'a>, job_id: JobId) -> BoxFuture<'a, Result<bool, PipelineError>> {
    Box::pin(async move {
        let job = deps.store.get_job(job_id).await?;
        let effective = cache::effective_status(deps.cache, job.pipeline_id, job_id, job.status).await;
        if effective != Status::Waiting {
            return Ok(false);
        }

        let inbound = deps.store.start_conditions_into(job_id).await?;
        for sc in &inbound {
            let preceding = deps.store.get_job(sc.preceding_job_id).await?;
            let preceding_status =
                cache::effective_status(deps.cache, preceding.pipeline_id, preceding.id, preceding.status).await;
            if sc.condition.is_satisfied_by(preceding_status) {
                if !preceding_status.is_terminal() {
                    return Ok(false);
                }
            } else {
                set_failed_status(deps, job_id).await?;
                start_dependent_jobs(deps, job_id).await?;
                return Ok(false);
            }
        }

        run(deps, job_id).await?;
        Ok(true)
    })
}

/// §4.4 `run`.
pub async fn run(deps: &Deps<'_>, job_id: JobId) -> Result<(), PipelineError> {
    let mut job = deps.store.get_job(job_id).await?;
    job.enqueued_workers_count = 0;
    deps.store.save_job(&job).await?;
    cache::set_status(deps.cache, job.pipeline_id, job_id, Status::Running).await?;

    let globals = deps.store.global_params().await?;
    let pipeline_params = deps.store.params_for_pipeline(job.pipeline_id).await?;
    let job_params = deps.store.params_for_job(job_id).await?;

    let mut worker_params = JsonMap::with_capacity(job_params.len());
    for p in &job_params {
        let value = param::resolve(p, &globals, &pipeline_params)?;
        worker_params.insert(p.name.clone(), param_value_to_json(&value));
    }

    enqueue(deps, job_id, job.worker_class.clone(), JsonValue::Object(worker_params), 0).await
}

/// §4.4 `enqueue`.
pub async fn enqueue(
    deps: &Deps<'_>,
    job_id: JobId,
    worker_class: String,
    worker_params: JsonValue,
    delay: i64,
) -> Result<(), PipelineError> {
    let mut job = deps.store.get_job(job_id).await?;
    let pipeline = deps.store.get_pipeline(job.pipeline_id).await?;
    let effective = cache::effective_status(deps.cache, pipeline.id, job_id, job.status).await;
    if effective != Status::Running {
        return Err(PipelineError::InvalidTransition {
            entity: "job",
            id: job_id,
            from: effective.to_string(),
            to: "enqueue".to_string(),
        });
    }

    let task_name = queue::mint_task_name(&pipeline.name, &job.name, &worker_class);
    cache::list_append(
        deps.cache,
        &cache::list_of_tasks_enqueued_key(pipeline.id),
        task_name.clone(),
    )
    .await?;

    let submission = TaskSubmission {
        target: "job-service".to_string(),
        name: task_name.clone(),
        url: "/task".to_string(),
        job_id,
        worker_class,
        worker_params,
        task_name: task_name.clone(),
        countdown: delay,
    };
    deps.queue.submit(submission).await?;

    cache::increment(
        deps.cache,
        &cache::enqueued_tasks_key(pipeline.id, job_id),
        job.enqueued_workers_count,
    )
    .await?;
    job.enqueued_workers_count += 1;
    deps.store.save_job(&job).await?;
    Ok(())
}

/// §4.4 `stop`.
pub async fn stop(deps: &Deps<'_>, job_id: JobId) -> Result<bool, PipelineError> {
    let mut job = deps.store.get_job(job_id).await?;
    let effective = cache::effective_status(deps.cache, job.pipeline_id, job_id, job.status).await;
    match effective {
        Status::Waiting => {
            cache::set_status(deps.cache, job.pipeline_id, job_id, Status::Failed).await?;
            job.status = Status::Failed;
            job.status_changed_at = chrono::Utc::now();
            deps.store.save_job(&job).await?;
            Ok(true)
        }
        Status::Running => {
            cache::set_status(deps.cache, job.pipeline_id, job_id, Status::Stopping).await?;
            job.status = Status::Stopping;
            job.status_changed_at = chrono::Utc::now();
            deps.store.save_job(&job).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// §4.4 `worker_succeeded`.
pub async fn worker_succeeded(deps: &Deps<'_>, job_id: JobId, task_name: &str) -> Result<(), PipelineError> {
    let job = deps.store.get_job(job_id).await?;
    cache::list_remove(
        deps.cache,
        &cache::list_of_tasks_enqueued_key(job.pipeline_id),
        task_name,
    )
    .await?;
    let remaining = cache::decrement(
        deps.cache,
        &cache::enqueued_tasks_key(job.pipeline_id, job_id),
        job.enqueued_workers_count,
    )
    .await?;

    if remaining <= 0 {
        let effective = cache::effective_status(deps.cache, job.pipeline_id, job_id, job.status).await;
        if effective != Status::Failed {
            set_succeeded_status(deps, job_id).await?;
        } else {
            set_failed_status(deps, job_id).await?;
        }
        start_dependent_jobs(deps, job_id).await?;
    } else {
        // `enqueued_workers_count` is a cold-start cache seed (§5), not a
        // live counter: it stays at its high-water mark and the row is
        // otherwise persisted unchanged.
        deps.store.save_job(&job).await?;
    }
    Ok(())
}

/// §4.4 `worker_failed`. Failure is sticky and unconditional: regardless
/// of the remaining count, the job is marked failed.
pub async fn worker_failed(deps: &Deps<'_>, job_id: JobId, task_name: &str) -> Result<(), PipelineError> {
    let job = deps.store.get_job(job_id).await?;
    cache::list_remove(
        deps.cache,
        &cache::list_of_tasks_enqueued_key(job.pipeline_id),
        task_name,
    )
    .await?;
    let remaining = cache::decrement(
        deps.cache,
        &cache::enqueued_tasks_key(job.pipeline_id, job_id),
        0,
    )
    .await?;

    set_failed_status(deps, job_id).await?;

    if remaining <= 0 {
        start_dependent_jobs(deps, job_id).await?;
    } else {
        // Re-read: `set_failed_status` just persisted this row with the
        // new status, so saving the pre-call `job` would clobber that
        // write. `enqueued_workers_count` stays at its high-water mark
        // (§5) — just persist the refreshed row unchanged.
        let job = deps.store.get_job(job_id).await?;
        deps.store.save_job(&job).await?;
    }
    Ok(())
}

/// §4.4 `set_succeeded_status`. A no-op if the job is already succeeded:
/// `worker_succeeded` and `worker_failed` both call their respective
/// `set_*_status` unconditionally on every sticky-failure delivery, so
/// this guard is what keeps `failed_jobs`/`remaining_jobs` from drifting
/// past `|jobs(P)|` under duplicate or out-of-order callbacks (§8
/// "Idempotence", universal invariant bounds).
pub async fn set_succeeded_status(deps: &Deps<'_>, job_id: JobId) -> Result<(), PipelineError> {
    let mut job = deps.store.get_job(job_id).await?;
    let effective = cache::effective_status(deps.cache, job.pipeline_id, job_id, job.status).await;
    if effective == Status::Succeeded {
        return Ok(());
    }
    cache::set_status(deps.cache, job.pipeline_id, job_id, Status::Succeeded).await?;
    job.status = Status::Succeeded;
    job.status_changed_at = chrono::Utc::now();
    deps.store.save_job(&job).await?;

    let total_jobs = deps.store.jobs_for_pipeline(job.pipeline_id).await?.len() as i64;
    cache::decrement(deps.cache, &cache::remaining_jobs_key(job.pipeline_id), total_jobs).await?;
    Ok(())
}

/// §4.4 `set_failed_status`. A no-op if the job is already failed — see
/// [`set_succeeded_status`].
pub async fn set_failed_status(deps: &Deps<'_>, job_id: JobId) -> Result<(), PipelineError> {
    let mut job = deps.store.get_job(job_id).await?;
    let effective = cache::effective_status(deps.cache, job.pipeline_id, job_id, job.status).await;
    if effective == Status::Failed {
        return Ok(());
    }
    cache::set_status(deps.cache, job.pipeline_id, job_id, Status::Failed).await?;
    job.status = Status::Failed;
    job.status_changed_at = chrono::Utc::now();
    deps.store.save_job(&job).await?;

    let total_jobs = deps.store.jobs_for_pipeline(job.pipeline_id).await?.len() as i64;
    cache::increment(deps.cache, &cache::failed_jobs_key(job.pipeline_id), total_jobs).await?;
    cache::decrement(deps.cache, &cache::remaining_jobs_key(job.pipeline_id), total_jobs).await?;
    Ok(())
}

/// §4.6 Dependent Propagation.
pub async fn start_dependent_jobs(deps: &Deps<'_>, job_id: JobId) -> Result<(), PipelineError> {
    let job = deps.store.get_job(job_id).await?;
    let outbound = deps.store.start_conditions_from(job_id).await?;
    for sc in &outbound {
        start(deps, sc.job_id).await?;
    }
    pipeline::job_finished(deps, job.pipeline_id).await?;
    Ok(())
}

fn param_value_to_json(value: &ParamValue) -> JsonValue {
    match value {
        ParamValue::String(s) => JsonValue::String(s.clone()),
        ParamValue::Bool(b) => JsonValue::Bool(*b),
        ParamValue::Number(Number::Int(i)) => JsonValue::Number((*i).into()),
        ParamValue::Number(Number::Float(f)) => {
            serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
        }
        ParamValue::StringList(items) => {
            JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
        }
        ParamValue::NumberList(items) => JsonValue::Array(
            items
                .iter()
                .map(|n| param_value_to_json(&ParamValue::Number(*n)))
                .collect(),
        ),
    }
}
