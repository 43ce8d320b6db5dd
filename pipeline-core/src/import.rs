//! Import/Clone Protocol (C6, §4.7) and its inverse, export, used by the
//! round-trip property in §8. Descriptor field names mirror the wire
//! shape in §4.7: `id`/`preceding_job_id` in [`JobDescriptor`] and
//! [`StartConditionDescriptor`] are *source-local* identifiers, resolved
//! through a freshly built mapping on import.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;
use crate::model::{ConditionKind, JobId, Param, ParamId, ParamType, PipelineId, Schedule, ScheduleId};
use crate::store::{NewJob, NewParam, NewSchedule, NewStartCondition, PipelineStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDescriptor {
    /// Present when this entry updates an existing param in place;
    /// absent for a new one (§4.8).
    pub id: Option<ParamId>,
    pub name: String,
    pub param_type: ParamType,
    pub value: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub is_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDescriptor {
    pub id: Option<ScheduleId>,
    pub cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConditionDescriptor {
    pub preceding_job_id: i64,
    pub condition: ConditionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: i64,
    pub name: String,
    pub worker_class: String,
    pub params: Vec<ParamDescriptor>,
    pub hash_start_conditions: Vec<StartConditionDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDescriptor {
    pub params: Vec<ParamDescriptor>,
    pub schedules: Vec<ScheduleDescriptor>,
    pub jobs: Vec<JobDescriptor>,
}

/// §4.7: applies params and schedules to `pipeline_id` (§4.8
/// discipline), then two-pass job creation.
pub async fn import_pipeline(
    store: &dyn PipelineStore,
    pipeline_id: PipelineId,
    descriptor: &PipelineDescriptor,
) -> Result<(), PipelineError> {
    let current_params = store.params_for_pipeline(pipeline_id).await?;
    sync_params(store, current_params, &descriptor.params, Some(pipeline_id), None).await?;

    let current_schedules = store.schedules_for_pipeline(pipeline_id).await?;
    sync_schedules(store, current_schedules, &descriptor.schedules, pipeline_id).await?;

    let mut job_mapping: HashMap<i64, JobId> = HashMap::with_capacity(descriptor.jobs.len());
    for jd in &descriptor.jobs {
        let job = store
            .create_job(NewJob {
                pipeline_id,
                name: jd.name.clone(),
                worker_class: jd.worker_class.clone(),
            })
            .await?;
        job_mapping.insert(jd.id, job.id);
        for pd in &jd.params {
            store
                .create_param(NewParam {
                    name: pd.name.clone(),
                    param_type: pd.param_type,
                    value: pd.value.clone(),
                    label: pd.label.clone(),
                    description: pd.description.clone(),
                    is_required: pd.is_required,
                    pipeline_id: None,
                    job_id: Some(job.id),
                })
                .await?;
        }
    }

    for jd in &descriptor.jobs {
        let new_job_id = job_mapping[&jd.id];
        for sc in &jd.hash_start_conditions {
            let preceding_job_id = *job_mapping
                .get(&sc.preceding_job_id)
                .ok_or(PipelineError::UnknownSourceJobId(sc.preceding_job_id))?;
            store
                .create_start_condition(NewStartCondition {
                    job_id: new_job_id,
                    preceding_job_id,
                    condition: sc.condition,
                })
                .await?;
        }
    }

    Ok(())
}

/// §4.8 Collection Update Discipline, specialized to [`Param`]: compute
/// intersection (update) / input−current (create) / current−input
/// (delete) and apply in that order.
async fn sync_params(
    store: &dyn PipelineStore,
    current: Vec<Param>,
    input: &[ParamDescriptor],
    pipeline_id: Option<PipelineId>,
    job_id: Option<JobId>,
) -> Result<(), PipelineError> {
    let current_ids: HashSet<ParamId> = current.iter().map(|p| p.id).collect();
    let input_ids: HashSet<ParamId> = input.iter().filter_map(|d| d.id).collect();

    for d in input {
        match d.id.filter(|id| current_ids.contains(id)) {
            Some(id) => {
                let mut existing = current.iter().find(|p| p.id == id).cloned().expect("id in current_ids");
                existing.name = d.name.clone();
                existing.param_type = d.param_type;
                existing.value = d.value.clone();
                existing.label = d.label.clone();
                existing.description = d.description.clone();
                existing.is_required = d.is_required;
                store.save_param(&existing).await?;
            }
            None => {
                store
                    .create_param(NewParam {
                        name: d.name.clone(),
                        param_type: d.param_type,
                        value: d.value.clone(),
                        label: d.label.clone(),
                        description: d.description.clone(),
                        is_required: d.is_required,
                        pipeline_id,
                        job_id,
                    })
                    .await?;
            }
        }
    }

    for p in &current {
        if !input_ids.contains(&p.id) {
            store.destroy_param(p.id).await?;
        }
    }
    Ok(())
}

/// §4.8, specialized to [`Schedule`]. Schedules have no content besides
/// the cron string, so "update" just overwrites it.
async fn sync_schedules(
    store: &dyn PipelineStore,
    current: Vec<Schedule>,
    input: &[ScheduleDescriptor],
    pipeline_id: PipelineId,
) -> Result<(), PipelineError> {
    let current_ids: HashSet<ScheduleId> = current.iter().map(|s| s.id).collect();
    let input_ids: HashSet<ScheduleId> = input.iter().filter_map(|d| d.id).collect();

    for d in input {
        if d.id.filter(|id| current_ids.contains(id)).is_none() {
            store
                .create_schedule(NewSchedule {
                    pipeline_id,
                    cron: d.cron.clone(),
                })
                .await?;
        }
    }
    for s in &current {
        if !input_ids.contains(&s.id) {
            store.destroy_schedule(s.id).await?;
        }
    }
    Ok(())
}

/// YAML wire format for the descriptor (matches `WorkflowDefinition`'s
/// YAML loading in the teacher's `ob-workflow::definition`).
pub fn to_yaml(descriptor: &PipelineDescriptor) -> Result<String, PipelineError> {
    serde_yaml::to_string(descriptor)
        .map_err(|e| PipelineError::MalformedGraph {
            pipeline_id: 0,
            message: format!("failed to serialize descriptor: {e}"),
        })
}

pub fn from_yaml(yaml: &str) -> Result<PipelineDescriptor, PipelineError> {
    serde_yaml::from_str(yaml).map_err(|e| PipelineError::MalformedGraph {
        pipeline_id: 0,
        message: format!("failed to parse descriptor: {e}"),
    })
}

/// Content hash of a descriptor's canonical YAML form, used to detect
/// accidental field drift (SPEC_FULL.md §B, matching `WorkflowLoader::
/// content_hash`). Collections are sorted by name/cron/preceding-id first,
/// so the hash is stable under reordering a descriptor's `Vec`s — only
/// actual content changes move it.
pub fn content_hash(descriptor: &PipelineDescriptor) -> Result<String, PipelineError> {
    let normalized = normalize(descriptor.clone());
    let yaml = to_yaml(&normalized)?;
    let mut hasher = Sha256::new();
    hasher.update(yaml.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn normalize(mut descriptor: PipelineDescriptor) -> PipelineDescriptor {
    descriptor.params.sort_by(|a, b| a.name.cmp(&b.name));
    descriptor.schedules.sort_by(|a, b| a.cron.cmp(&b.cron));
    descriptor.jobs.sort_by(|a, b| a.name.cmp(&b.name));
    for job in &mut descriptor.jobs {
        job.params.sort_by(|a, b| a.name.cmp(&b.name));
        job.hash_start_conditions
            .sort_by_key(|sc| sc.preceding_job_id);
    }
    descriptor
}

fn param_to_descriptor(p: &Param) -> ParamDescriptor {
    ParamDescriptor {
        id: Some(p.id),
        name: p.name.clone(),
        param_type: p.param_type,
        value: p.value.clone(),
        label: p.label.clone(),
        description: p.description.clone(),
        is_required: p.is_required,
    }
}

/// The inverse of [`import_pipeline`]; not part of the distilled spec's
/// C6 but required to exercise the round-trip property in §8.
pub async fn export_pipeline(
    store: &dyn PipelineStore,
    pipeline_id: PipelineId,
) -> Result<PipelineDescriptor, PipelineError> {
    let params = store.params_for_pipeline(pipeline_id).await?;
    let schedules = store.schedules_for_pipeline(pipeline_id).await?;
    let jobs = store.jobs_for_pipeline(pipeline_id).await?;

    let mut job_descriptors = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let job_params = store.params_for_job(job.id).await?;
        let inbound = store.start_conditions_into(job.id).await?;
        job_descriptors.push(JobDescriptor {
            id: job.id,
            name: job.name.clone(),
            worker_class: job.worker_class.clone(),
            params: job_params.iter().map(param_to_descriptor).collect(),
            hash_start_conditions: inbound
                .iter()
                .map(|sc| StartConditionDescriptor {
                    preceding_job_id: sc.preceding_job_id,
                    condition: sc.condition,
                })
                .collect(),
        });
    }

    Ok(PipelineDescriptor {
        params: params.iter().map(param_to_descriptor).collect(),
        schedules: schedules
            .iter()
            .map(|s| ScheduleDescriptor {
                id: Some(s.id),
                cron: s.cron.clone(),
            })
            .collect(),
        jobs: job_descriptors,
    })
}
