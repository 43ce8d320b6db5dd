//! In-memory [`PipelineStore`] used by tests and examples. Modeled on
//! `bpmn-lite-core::store_memory::MemoryStore`: one `RwLock<Inner>`
//! holding every entity table as a `HashMap`, with monotonically
//! increasing id counters standing in for database sequences.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::{
    GeneralSetting, Job, JobId, Param, ParamId, Pipeline, PipelineId, Schedule, ScheduleId, Stage,
    StartCondition, StartConditionId, Status,
};
use crate::store::{
    NewJob, NewParam, NewPipeline, NewSchedule, NewStartCondition, PipelineStore,
};

#[derive(Default)]
struct Inner {
    pipelines: HashMap<PipelineId, Pipeline>,
    jobs: HashMap<JobId, Job>,
    params: HashMap<ParamId, Param>,
    start_conditions: HashMap<StartConditionId, StartCondition>,
    schedules: HashMap<ScheduleId, Schedule>,
    general_settings: HashMap<String, GeneralSetting>,
    stages: HashMap<String, Stage>,
    next_pipeline_id: PipelineId,
    next_job_id: JobId,
    next_param_id: ParamId,
    next_start_condition_id: StartConditionId,
    next_schedule_id: ScheduleId,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(entity: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{entity} {id}"))
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline, StoreError> {
        let inner = self.inner.read().await;
        inner
            .pipelines
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("pipeline", id))
    }

    async fn create_pipeline(&self, new: NewPipeline) -> Result<Pipeline, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_pipeline_id += 1;
        let id = inner.next_pipeline_id;
        let pipeline = Pipeline {
            id,
            name: new.name,
            emails_for_notifications: new.emails_for_notifications,
            status: Status::Idle,
            status_changed_at: Utc::now(),
            run_on_schedule: new.run_on_schedule,
        };
        inner.pipelines.insert(id, pipeline.clone());
        Ok(pipeline)
    }

    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.pipelines.contains_key(&pipeline.id) {
            return Err(not_found("pipeline", pipeline.id));
        }
        inner.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(())
    }

    async fn destroy_pipeline(&self, id: PipelineId) -> Result<(), StoreError> {
        let job_ids: Vec<JobId> = {
            let inner = self.inner.read().await;
            inner
                .jobs
                .values()
                .filter(|j| j.pipeline_id == id)
                .map(|j| j.id)
                .collect()
        };
        for job_id in job_ids {
            self.destroy_job(job_id).await?;
        }

        let mut inner = self.inner.write().await;
        let schedule_ids: Vec<ScheduleId> = inner
            .schedules
            .values()
            .filter(|s| s.pipeline_id == id)
            .map(|s| s.id)
            .collect();
        for sid in schedule_ids {
            inner.schedules.remove(&sid);
        }
        let param_ids: Vec<ParamId> = inner
            .params
            .values()
            .filter(|p| p.pipeline_id == Some(id) && p.job_id.is_none())
            .map(|p| p.id)
            .collect();
        for pid in param_ids {
            inner.params.remove(&pid);
        }
        inner
            .pipelines
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("pipeline", id))
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        let inner = self.inner.read().await;
        inner.jobs.get(&id).cloned().ok_or_else(|| not_found("job", id))
    }

    async fn jobs_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_job_id += 1;
        let id = inner.next_job_id;
        let job = Job {
            id,
            pipeline_id: new.pipeline_id,
            name: new.name,
            worker_class: new.worker_class,
            status: Status::Idle,
            status_changed_at: Utc::now(),
            enqueued_workers_count: 0,
        };
        inner.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job.id) {
            return Err(not_found("job", job.id));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn destroy_job(&self, id: JobId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let param_ids: Vec<ParamId> = inner
            .params
            .values()
            .filter(|p| p.job_id == Some(id))
            .map(|p| p.id)
            .collect();
        for pid in param_ids {
            inner.params.remove(&pid);
        }
        let sc_ids: Vec<StartConditionId> = inner
            .start_conditions
            .values()
            .filter(|sc| sc.job_id == id || sc.preceding_job_id == id)
            .map(|sc| sc.id)
            .collect();
        for scid in sc_ids {
            inner.start_conditions.remove(&scid);
        }
        inner.jobs.remove(&id).map(|_| ()).ok_or_else(|| not_found("job", id))
    }

    async fn global_params(&self) -> Result<Vec<Param>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .params
            .values()
            .filter(|p| p.pipeline_id.is_none() && p.job_id.is_none())
            .cloned()
            .collect())
    }

    async fn params_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Param>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .params
            .values()
            .filter(|p| p.pipeline_id == Some(pipeline_id) && p.job_id.is_none())
            .cloned()
            .collect())
    }

    async fn params_for_job(&self, job_id: JobId) -> Result<Vec<Param>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .params
            .values()
            .filter(|p| p.job_id == Some(job_id))
            .cloned()
            .collect())
    }

    async fn create_param(&self, new: NewParam) -> Result<Param, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_param_id += 1;
        let id = inner.next_param_id;
        let param = Param {
            id,
            name: new.name,
            param_type: new.param_type,
            value: new.value,
            label: new.label,
            description: new.description,
            is_required: new.is_required,
            pipeline_id: new.pipeline_id,
            job_id: new.job_id,
        };
        inner.params.insert(id, param.clone());
        Ok(param)
    }

    async fn save_param(&self, param: &Param) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.params.contains_key(&param.id) {
            return Err(not_found("param", param.id));
        }
        inner.params.insert(param.id, param.clone());
        Ok(())
    }

    async fn destroy_param(&self, id: ParamId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.params.remove(&id).map(|_| ()).ok_or_else(|| not_found("param", id))
    }

    async fn start_conditions_for_pipeline(
        &self,
        pipeline_id: PipelineId,
    ) -> Result<Vec<StartCondition>, StoreError> {
        let inner = self.inner.read().await;
        let job_ids: std::collections::HashSet<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.pipeline_id == pipeline_id)
            .map(|j| j.id)
            .collect();
        Ok(inner
            .start_conditions
            .values()
            .filter(|sc| job_ids.contains(&sc.job_id))
            .cloned()
            .collect())
    }

    async fn start_conditions_into(&self, job_id: JobId) -> Result<Vec<StartCondition>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .start_conditions
            .values()
            .filter(|sc| sc.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn start_conditions_from(&self, job_id: JobId) -> Result<Vec<StartCondition>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .start_conditions
            .values()
            .filter(|sc| sc.preceding_job_id == job_id)
            .cloned()
            .collect())
    }

    async fn create_start_condition(
        &self,
        new: NewStartCondition,
    ) -> Result<StartCondition, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_start_condition_id += 1;
        let id = inner.next_start_condition_id;
        let sc = StartCondition {
            id,
            job_id: new.job_id,
            preceding_job_id: new.preceding_job_id,
            condition: new.condition,
        };
        inner.start_conditions.insert(id, sc.clone());
        Ok(sc)
    }

    async fn destroy_start_condition(&self, id: StartConditionId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .start_conditions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("start_condition", id))
    }

    async fn schedules_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Schedule>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .schedules
            .values()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn create_schedule(&self, new: NewSchedule) -> Result<Schedule, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_schedule_id += 1;
        let id = inner.next_schedule_id;
        let schedule = Schedule {
            id,
            pipeline_id: new.pipeline_id,
            cron: new.cron,
        };
        inner.schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    async fn destroy_schedule(&self, id: ScheduleId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .schedules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("schedule", id))
    }

    async fn get_general_setting(&self, name: &str) -> Result<Option<GeneralSetting>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.general_settings.get(name).cloned())
    }

    async fn set_general_setting(&self, setting: GeneralSetting) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.general_settings.insert(setting.name.clone(), setting);
        Ok(())
    }

    async fn list_stages(&self) -> Result<Vec<Stage>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.stages.values().cloned().collect())
    }

    async fn create_stage(&self, stage: Stage) -> Result<Stage, StoreError> {
        let mut inner = self.inner.write().await;
        inner.stages.insert(stage.sid.clone(), stage.clone());
        Ok(stage)
    }
}
