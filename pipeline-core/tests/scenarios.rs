//! End-to-end coverage of the six scenarios and the universal invariants,
//! exercised against the in-memory store/cache/queue (matching
//! `bpmn-lite-server/tests/integration.rs`'s shape: build a fixture
//! through the public API, drive it through callbacks, assert on the
//! resulting persisted state).

use pipeline_core::cache::{self, CacheValue, InMemoryCache};
use pipeline_core::job::{self, Deps};
use pipeline_core::model::{ConditionKind, ParamType, Status};
use pipeline_core::notify::LoggingNotifier;
use pipeline_core::pipeline;
use pipeline_core::queue::InMemoryQueue;
use pipeline_core::store::{NewJob, NewParam, NewPipeline, NewStartCondition};
use pipeline_core::store_memory::MemoryStore;

struct Fixture {
    store: MemoryStore,
    cache: InMemoryCache,
    queue: InMemoryQueue,
    notifier: LoggingNotifier,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            cache: InMemoryCache::new(),
            queue: InMemoryQueue::new(),
            notifier: LoggingNotifier,
        }
    }

    fn deps(&self) -> Deps<'_> {
        Deps {
            store: &self.store,
            cache: &self.cache,
            queue: &self.queue,
            notifier: &self.notifier,
        }
    }
}

#[tokio::test]
async fn scenario_1_linear_success() {
    let f = Fixture::new();
    let pipeline = f
        .store
        .create_pipeline(NewPipeline {
            name: "etl".into(),
            emails_for_notifications: "ops@example.com".into(),
            run_on_schedule: false,
        })
        .await
        .unwrap();
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let job = f
            .store
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: name.into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();
        ids.push(job.id);
    }
    f.store
        .create_start_condition(NewStartCondition {
            job_id: ids[1],
            preceding_job_id: ids[0],
            condition: ConditionKind::Success,
        })
        .await
        .unwrap();
    f.store
        .create_start_condition(NewStartCondition {
            job_id: ids[2],
            preceding_job_id: ids[1],
            condition: ConditionKind::Success,
        })
        .await
        .unwrap();

    let deps = f.deps();
    assert!(pipeline::start(&deps, pipeline.id).await.unwrap());
    for _ in 0..3 {
        let submissions = f.queue.submissions().await;
        let next = submissions.last().unwrap().clone();
        job::worker_succeeded(&deps, next.job_id, &next.task_name).await.unwrap();
    }

    for id in &ids {
        assert_eq!(f.store.get_job(*id).await.unwrap().status, Status::Succeeded);
    }
    assert_eq!(f.store.get_pipeline(pipeline.id).await.unwrap().status, Status::Succeeded);
    assert_eq!(
        f.cache.get(&cache::failed_jobs_key(pipeline.id)).await.unwrap(),
        Some(CacheValue::Int(0))
    );
    assert_eq!(
        f.cache.get(&cache::remaining_jobs_key(pipeline.id)).await.unwrap(),
        Some(CacheValue::Int(0))
    );
}

#[tokio::test]
async fn scenario_2_failure_stops_downstream() {
    let f = Fixture::new();
    let pipeline = f
        .store
        .create_pipeline(NewPipeline {
            name: "p".into(),
            emails_for_notifications: String::new(),
            run_on_schedule: false,
        })
        .await
        .unwrap();
    let a = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "a".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    let b = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "b".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    f.store
        .create_start_condition(NewStartCondition {
            job_id: b.id,
            preceding_job_id: a.id,
            condition: ConditionKind::Success,
        })
        .await
        .unwrap();

    let deps = f.deps();
    pipeline::start(&deps, pipeline.id).await.unwrap();
    let task = f.queue.submissions().await[0].task_name.clone();
    job::worker_failed(&deps, a.id, &task).await.unwrap();

    assert_eq!(f.store.get_job(a.id).await.unwrap().status, Status::Failed);
    assert_eq!(f.store.get_job(b.id).await.unwrap().status, Status::Failed);
    assert_eq!(f.store.get_pipeline(pipeline.id).await.unwrap().status, Status::Failed);
    assert_eq!(f.queue.submissions().await.len(), 1);
}

#[tokio::test]
async fn scenario_3_fail_on_failure_edge() {
    // A succeeds -> the `fail` edge is violated -> B fails, pipeline fails.
    {
        let f = Fixture::new();
        let pipeline = f
            .store
            .create_pipeline(NewPipeline {
                name: "p".into(),
                emails_for_notifications: String::new(),
                run_on_schedule: false,
            })
            .await
            .unwrap();
        let a = f
            .store
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "a".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();
        let b = f
            .store
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "b".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();
        f.store
            .create_start_condition(NewStartCondition {
                job_id: b.id,
                preceding_job_id: a.id,
                condition: ConditionKind::Fail,
            })
            .await
            .unwrap();

        let deps = f.deps();
        pipeline::start(&deps, pipeline.id).await.unwrap();
        let task = f.queue.submissions().await[0].task_name.clone();
        job::worker_succeeded(&deps, a.id, &task).await.unwrap();

        assert_eq!(f.store.get_job(a.id).await.unwrap().status, Status::Succeeded);
        assert_eq!(f.store.get_job(b.id).await.unwrap().status, Status::Failed);
        assert_eq!(f.store.get_pipeline(pipeline.id).await.unwrap().status, Status::Failed);
        assert_eq!(f.queue.submissions().await.len(), 1); // B never dispatched
    }

    // A fails -> the `fail` edge is satisfied -> B starts normally.
    {
        let f = Fixture::new();
        let pipeline = f
            .store
            .create_pipeline(NewPipeline {
                name: "p".into(),
                emails_for_notifications: String::new(),
                run_on_schedule: false,
            })
            .await
            .unwrap();
        let a = f
            .store
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "a".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();
        let b = f
            .store
            .create_job(NewJob {
                pipeline_id: pipeline.id,
                name: "b".into(),
                worker_class: "Worker".into(),
            })
            .await
            .unwrap();
        f.store
            .create_start_condition(NewStartCondition {
                job_id: b.id,
                preceding_job_id: a.id,
                condition: ConditionKind::Fail,
            })
            .await
            .unwrap();

        let deps = f.deps();
        pipeline::start(&deps, pipeline.id).await.unwrap();
        let task = f.queue.submissions().await[0].task_name.clone();
        job::worker_failed(&deps, a.id, &task).await.unwrap();

        assert_eq!(f.store.get_job(a.id).await.unwrap().status, Status::Failed);
        assert_eq!(f.queue.submissions().await.len(), 2); // B was dispatched
        let task_b = f.queue.submissions().await[1].task_name.clone();
        job::worker_succeeded(&deps, b.id, &task_b).await.unwrap();
        assert_eq!(f.store.get_job(b.id).await.unwrap().status, Status::Succeeded);
    }
}

#[tokio::test]
async fn scenario_4_whatever_edge_outcome_follows_sinks_not_predecessors() {
    let f = Fixture::new();
    let pipeline = f
        .store
        .create_pipeline(NewPipeline {
            name: "p".into(),
            emails_for_notifications: String::new(),
            run_on_schedule: false,
        })
        .await
        .unwrap();
    let a = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "a".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    let b = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "b".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    f.store
        .create_start_condition(NewStartCondition {
            job_id: b.id,
            preceding_job_id: a.id,
            condition: ConditionKind::Whatever,
        })
        .await
        .unwrap();

    let deps = f.deps();
    pipeline::start(&deps, pipeline.id).await.unwrap();
    let task_a = f.queue.submissions().await[0].task_name.clone();
    job::worker_failed(&deps, a.id, &task_a).await.unwrap();

    // B starts despite A's failure.
    assert_eq!(f.queue.submissions().await.len(), 2);
    let task_b = f.queue.submissions().await[1].task_name.clone();
    job::worker_succeeded(&deps, b.id, &task_b).await.unwrap();

    // B is the only sink; pipeline outcome follows it, not A.
    assert_eq!(f.store.get_job(a.id).await.unwrap().status, Status::Failed);
    assert_eq!(f.store.get_job(b.id).await.unwrap().status, Status::Succeeded);
    assert_eq!(f.store.get_pipeline(pipeline.id).await.unwrap().status, Status::Succeeded);
}

#[tokio::test]
async fn scenario_5_param_expansion() {
    let f = Fixture::new();
    let pipeline = f
        .store
        .create_pipeline(NewPipeline {
            name: "p".into(),
            emails_for_notifications: String::new(),
            run_on_schedule: false,
        })
        .await
        .unwrap();
    let job = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "only".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    f.store
        .create_param(NewParam {
            name: "x".into(),
            param_type: ParamType::String,
            value: "2".into(),
            label: None,
            description: None,
            is_required: false,
            pipeline_id: None,
            job_id: None,
        })
        .await
        .unwrap();
    f.store
        .create_param(NewParam {
            name: "y".into(),
            param_type: ParamType::String,
            value: "3".into(),
            label: None,
            description: None,
            is_required: false,
            pipeline_id: Some(pipeline.id),
            job_id: None,
        })
        .await
        .unwrap();
    f.store
        .create_param(NewParam {
            name: "z".into(),
            param_type: ParamType::Number,
            value: "{% x + y + 5 %}".into(),
            label: None,
            description: None,
            is_required: false,
            pipeline_id: Some(pipeline.id),
            job_id: Some(job.id),
        })
        .await
        .unwrap();

    let deps = f.deps();
    pipeline::start(&deps, pipeline.id).await.unwrap();
    let submission = &f.queue.submissions().await[0];
    assert_eq!(submission.worker_params["z"], serde_json::json!(10));
}

#[tokio::test]
async fn scenario_6_fanout_then_join() {
    let f = Fixture::new();
    let pipeline = f
        .store
        .create_pipeline(NewPipeline {
            name: "p".into(),
            emails_for_notifications: String::new(),
            run_on_schedule: false,
        })
        .await
        .unwrap();
    let j = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "j".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    let dependent = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "dependent".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    f.store
        .create_start_condition(NewStartCondition {
            job_id: dependent.id,
            preceding_job_id: j.id,
            condition: ConditionKind::Success,
        })
        .await
        .unwrap();

    let deps = f.deps();
    pipeline::start(&deps, pipeline.id).await.unwrap();
    // J's worker recursively enqueues two more tasks of its own, for a
    // total of three outstanding callbacks (§8 scenario 6).
    job::enqueue(&deps, j.id, "Worker".into(), serde_json::json!({}), 0)
        .await
        .unwrap();
    job::enqueue(&deps, j.id, "Worker".into(), serde_json::json!({}), 0)
        .await
        .unwrap();

    let submissions = f.queue.submissions().await;
    assert_eq!(submissions.len(), 3);
    let names: Vec<String> = submissions.iter().map(|s| s.task_name.clone()).collect();

    // Interleaved delivery: succeed, fail, succeed.
    job::worker_succeeded(&deps, j.id, &names[0]).await.unwrap();
    job::worker_failed(&deps, j.id, &names[1]).await.unwrap();
    job::worker_succeeded(&deps, j.id, &names[2]).await.unwrap();

    assert_eq!(f.store.get_job(j.id).await.unwrap().status, Status::Failed);
    assert_eq!(
        cache::effective_status(&f.cache, pipeline.id, j.id, Status::Idle).await,
        Status::Failed
    );
    assert_eq!(
        f.cache
            .get(&cache::list_of_tasks_enqueued_key(pipeline.id))
            .await
            .unwrap(),
        Some(CacheValue::List(Vec::new()))
    );

    // `dependent`'s `success` edge is violated by J's failure: it is
    // started exactly once, fails on the edge check, and is never
    // dispatched — which is also why the pipeline-wide task list above
    // comes back empty rather than gaining a new entry. `failed_jobs`
    // counts both J and `dependent`, since the edge violation marks
    // `dependent` failed too.
    assert_eq!(
        f.cache
            .get(&cache::failed_jobs_key(pipeline.id))
            .await
            .unwrap(),
        Some(CacheValue::Int(2))
    );
    assert_eq!(f.store.get_job(dependent.id).await.unwrap().status, Status::Failed);
    let dependent_submissions: Vec<_> = f
        .queue
        .submissions()
        .await
        .into_iter()
        .filter(|s| s.job_id == dependent.id)
        .collect();
    assert!(dependent_submissions.is_empty());

    // Both J and `dependent` cascade into `job_finished` on this same
    // terminal transition; the pipeline still only finishes once.
    assert_eq!(
        f.store.get_pipeline(pipeline.id).await.unwrap().status,
        Status::Failed
    );
}

#[tokio::test]
async fn no_job_enters_running_while_its_predecessor_is_non_terminal() {
    let f = Fixture::new();
    let pipeline = f
        .store
        .create_pipeline(NewPipeline {
            name: "p".into(),
            emails_for_notifications: String::new(),
            run_on_schedule: false,
        })
        .await
        .unwrap();
    let a = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "a".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    let b = f
        .store
        .create_job(NewJob {
            pipeline_id: pipeline.id,
            name: "b".into(),
            worker_class: "Worker".into(),
        })
        .await
        .unwrap();
    f.store
        .create_start_condition(NewStartCondition {
            job_id: b.id,
            preceding_job_id: a.id,
            condition: ConditionKind::Success,
        })
        .await
        .unwrap();

    let deps = f.deps();
    pipeline::start(&deps, pipeline.id).await.unwrap();
    // A is still running; B must not have been dispatched.
    assert_eq!(f.store.get_job(a.id).await.unwrap().status, Status::Running);
    assert_eq!(f.store.get_job(b.id).await.unwrap().status, Status::Idle);
    assert_eq!(f.queue.submissions().await.len(), 1);
}
