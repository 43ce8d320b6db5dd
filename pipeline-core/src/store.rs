//! Entity Store Adapter (C2, §4.2). A repository trait only: CRUD plus
//! scoped queries, no query language leaks through it. Modeled directly
//! on `bpmn-lite-core::store::ProcessStore` — one async trait grouping
//! methods by entity, implemented once in-memory (tests) and once
//! against Postgres behind the `database` feature.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{
    GeneralSetting, Job, JobId, ParamId, Pipeline, PipelineId, Schedule, ScheduleId, Stage,
    StartCondition, StartConditionId,
};
use crate::model::Param;

/// Attributes for a not-yet-persisted [`Pipeline`]; the store assigns
/// `id` and `status_changed_at`.
#[derive(Debug, Clone)]
pub struct NewPipeline {
    pub name: String,
    pub emails_for_notifications: String,
    pub run_on_schedule: bool,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub pipeline_id: PipelineId,
    pub name: String,
    pub worker_class: String,
}

#[derive(Debug, Clone)]
pub struct NewParam {
    pub name: String,
    pub param_type: crate::model::ParamType,
    pub value: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub is_required: bool,
    pub pipeline_id: Option<PipelineId>,
    pub job_id: Option<JobId>,
}

#[derive(Debug, Clone)]
pub struct NewStartCondition {
    pub job_id: JobId,
    pub preceding_job_id: JobId,
    pub condition: crate::model::ConditionKind,
}

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub pipeline_id: PipelineId,
    pub cron: String,
}

/// Persistence trait for all pipeline/job state (§4.2, §6 "Persisted
/// schema"). The job and pipeline state machines and the import
/// protocol operate exclusively through this trait, enabling pluggable
/// backends (an in-memory store for tests, Postgres for production).
#[async_trait]
pub trait PipelineStore: Send + Sync {
    // Pipelines
    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline, StoreError>;
    async fn create_pipeline(&self, new: NewPipeline) -> Result<Pipeline, StoreError>;
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError>;
    /// Cascades to the pipeline's schedules, params, and every owned job
    /// (which itself cascades) — §3 "Lifecycle".
    async fn destroy_pipeline(&self, id: PipelineId) -> Result<(), StoreError>;

    // Jobs
    async fn get_job(&self, id: JobId) -> Result<Job, StoreError>;
    async fn jobs_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>, StoreError>;
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError>;
    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;
    /// Cascades to the job's params and start conditions, both inbound
    /// and outbound.
    async fn destroy_job(&self, id: JobId) -> Result<(), StoreError>;

    // Params
    async fn global_params(&self) -> Result<Vec<Param>, StoreError>;
    async fn params_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Param>, StoreError>;
    async fn params_for_job(&self, job_id: JobId) -> Result<Vec<Param>, StoreError>;
    async fn create_param(&self, new: NewParam) -> Result<Param, StoreError>;
    async fn save_param(&self, param: &Param) -> Result<(), StoreError>;
    async fn destroy_param(&self, id: ParamId) -> Result<(), StoreError>;

    // Start conditions
    async fn start_conditions_for_pipeline(
        &self,
        pipeline_id: PipelineId,
    ) -> Result<Vec<StartCondition>, StoreError>;
    /// Inbound edges: `job_id == job_id`.
    async fn start_conditions_into(&self, job_id: JobId) -> Result<Vec<StartCondition>, StoreError>;
    /// Outbound edges: `preceding_job_id == job_id`.
    async fn start_conditions_from(&self, job_id: JobId) -> Result<Vec<StartCondition>, StoreError>;
    async fn create_start_condition(
        &self,
        new: NewStartCondition,
    ) -> Result<StartCondition, StoreError>;
    async fn destroy_start_condition(&self, id: StartConditionId) -> Result<(), StoreError>;

    // Schedules
    async fn schedules_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Schedule>, StoreError>;
    async fn create_schedule(&self, new: NewSchedule) -> Result<Schedule, StoreError>;
    async fn destroy_schedule(&self, id: ScheduleId) -> Result<(), StoreError>;

    // GeneralSetting / Stage (SPEC_FULL.md §C: inert, CRUD only)
    async fn get_general_setting(&self, name: &str) -> Result<Option<GeneralSetting>, StoreError>;
    async fn set_general_setting(&self, setting: GeneralSetting) -> Result<(), StoreError>;
    async fn list_stages(&self) -> Result<Vec<Stage>, StoreError>;
    async fn create_stage(&self, stage: Stage) -> Result<Stage, StoreError>;
}
