//! Entities and closed status enums for pipelines, jobs, params, start
//! conditions and schedules (spec §3), plus the two inert persisted
//! entities the distilled spec never defines but the persisted schema in
//! §6 names: `GeneralSetting` and `Stage`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PipelineId = i64;
pub type JobId = i64;
pub type ParamId = i64;
pub type ScheduleId = i64;
pub type StartConditionId = i64;

/// Status domain shared by Pipeline and Job (§9 "run-time polymorphism on
/// status": one closed enum, transitions validated at the point of
/// mutation rather than left as magic strings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Waiting,
    Running,
    Stopping,
    Succeeded,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Waiting => "waiting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Status::Idle),
            "waiting" => Ok(Status::Waiting),
            "running" => Ok(Status::Running),
            "stopping" => Ok(Status::Stopping),
            "succeeded" => Ok(Status::Succeeded),
            "failed" => Ok(Status::Failed),
            other => Err(format!("unrecognized status {other:?}")),
        }
    }
}

/// `condition` on a [`StartCondition`] edge (§3, wire tokens per §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Success,
    Fail,
    Whatever,
}

impl ConditionKind {
    /// Whether the edge is satisfied given the preceding job's *current*
    /// status. Defined over any status, not just terminal ones: a
    /// `success` edge is fulfilled by every non-`failed` status,
    /// including non-terminal ones — callers additionally check
    /// terminal-ness themselves to decide between "proceed" and "not
    /// ready yet" (§4.4 `start`).
    pub fn is_satisfied_by(self, preceding_status: Status) -> bool {
        match self {
            ConditionKind::Success => preceding_status != Status::Failed,
            ConditionKind::Fail => preceding_status != Status::Succeeded,
            ConditionKind::Whatever => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::Success => "success",
            ConditionKind::Fail => "fail",
            ConditionKind::Whatever => "whatever",
        }
    }
}

impl std::str::FromStr for ConditionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ConditionKind::Success),
            "fail" => Ok(ConditionKind::Fail),
            "whatever" => Ok(ConditionKind::Whatever),
            other => Err(format!("unrecognized start condition {other:?}")),
        }
    }
}

/// `type` on a [`Param`] (§3, wire tokens per §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    StringList,
    NumberList,
}

/// The resolved, typed value of a param after expansion and coercion
/// (§9 "dynamic param values": modeled as a sum type rather than left
/// dynamically typed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Number(Number),
    Bool(bool),
    StringList(Vec<String>),
    NumberList(Vec<Number>),
}

/// Numeric param values coerce to int when parseable, else float, else
/// `0` (§4.1 step 6; the zero fallback is a preserved behavior, see
/// DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn zero() -> Self {
        Number::Int(0)
    }
}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    /// Whitespace-separated notification addresses (§3; `recipients()`
    /// splits this).
    pub emails_for_notifications: String,
    pub status: Status,
    pub status_changed_at: DateTime<Utc>,
    pub run_on_schedule: bool,
}

impl Pipeline {
    pub fn recipients(&self) -> Vec<&str> {
        self.emails_for_notifications.split_whitespace().collect()
    }

    /// §3: "blocked iff run_on_schedule is true or status in
    /// {running, stopping}".
    pub fn is_blocked(&self) -> bool {
        self.run_on_schedule || matches!(self.status, Status::Running | Status::Stopping)
    }

    /// §3: "finished" is accepted as an alias for a terminal status on
    /// entry to `start`.
    pub fn is_startable_from(&self) -> bool {
        matches!(
            self.status,
            Status::Idle | Status::Succeeded | Status::Failed
        )
    }

    /// A pipeline with no jobs can never leave `idle` (§4.5 `start`
    /// refuses it outright).
    pub fn has_jobs(jobs: &[Job]) -> bool {
        !jobs.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub worker_class: String,
    pub status: Status,
    pub status_changed_at: DateTime<Utc>,
    pub enqueued_workers_count: i64,
}

impl Job {
    pub fn is_startable_from(&self) -> bool {
        matches!(self.status, Status::Idle | Status::Succeeded | Status::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCondition {
    pub id: StartConditionId,
    pub job_id: JobId,
    pub preceding_job_id: JobId,
    pub condition: ConditionKind,
}

/// Scope a [`Param`] belongs to — exactly one of global, pipeline, job
/// (§3: "a Param belongs to at most one scope").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamScope {
    Global,
    Pipeline(PipelineId),
    Job(JobId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub id: ParamId,
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub value: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub is_required: bool,
    pub pipeline_id: Option<PipelineId>,
    pub job_id: Option<JobId>,
}

impl Param {
    pub fn scope(&self) -> ParamScope {
        match (self.pipeline_id, self.job_id) {
            (_, Some(job_id)) => ParamScope::Job(job_id),
            (Some(pipeline_id), None) => ParamScope::Pipeline(pipeline_id),
            (None, None) => ParamScope::Global,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub pipeline_id: PipelineId,
    pub cron: String,
}

/// Inert key/value row; no behavior in the original beyond CRUD (§6,
/// SPEC_FULL.md §C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSetting {
    pub name: String,
    pub value: String,
}

/// Inert staging-slug row; no behavior beyond CRUD (§6, SPEC_FULL.md §C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub sid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_satisfaction_matches_spec_table() {
        assert!(ConditionKind::Success.is_satisfied_by(Status::Succeeded));
        assert!(!ConditionKind::Success.is_satisfied_by(Status::Failed));
        assert!(ConditionKind::Fail.is_satisfied_by(Status::Failed));
        assert!(!ConditionKind::Fail.is_satisfied_by(Status::Succeeded));
        assert!(ConditionKind::Whatever.is_satisfied_by(Status::Succeeded));
        assert!(ConditionKind::Whatever.is_satisfied_by(Status::Failed));
    }

    #[test]
    fn pipeline_blocked_rules() {
        let mut p = Pipeline {
            id: 1,
            name: "p".into(),
            emails_for_notifications: "a@example.com  b@example.com".into(),
            status: Status::Idle,
            status_changed_at: Utc::now(),
            run_on_schedule: false,
        };
        assert!(!p.is_blocked());
        p.run_on_schedule = true;
        assert!(p.is_blocked());
        p.run_on_schedule = false;
        p.status = Status::Running;
        assert!(p.is_blocked());
        assert_eq!(p.recipients(), vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn param_scope_precedence_order() {
        let global = Param {
            id: 1,
            name: "x".into(),
            param_type: ParamType::String,
            value: "1".into(),
            label: None,
            description: None,
            is_required: false,
            pipeline_id: None,
            job_id: None,
        };
        assert_eq!(global.scope(), ParamScope::Global);

        let mut pipeline_scoped = global.clone();
        pipeline_scoped.pipeline_id = Some(10);
        assert_eq!(pipeline_scoped.scope(), ParamScope::Pipeline(10));

        let mut job_scoped = pipeline_scoped.clone();
        job_scoped.job_id = Some(20);
        assert_eq!(job_scoped.scope(), ParamScope::Job(20));
    }
}
