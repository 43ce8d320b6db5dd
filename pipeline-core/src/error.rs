//! Error kinds for the pipeline execution core (see spec §7).

/// Top-level error returned by the job/pipeline state machines and the
/// param resolver. `InvalidTransition` and the "not ready" case are not
/// really errors (spec §7 calls the latter benign) but are represented
/// here so callers can match on them uniformly; state-machine methods
/// that spec.md says "return false" still return `Ok(false)`, not one of
/// these variants — these are for the cases spec.md calls out as actual
/// error kinds.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A param inliner failed to evaluate or referenced an unknown name.
    #[error("bad expression in param {param_id} ({param_name}): {message}")]
    BadExpression {
        param_id: i64,
        param_name: String,
        message: String,
    },

    /// An operation was attempted in a disallowed state.
    #[error("invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        from: String,
        to: String,
    },

    /// The underlying entity store failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// The counter/status cache failed.
    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),

    /// The task queue rejected a submission for a reason other than a
    /// duplicate name (duplicates are folded into success, see §5
    /// "Idempotence").
    #[error("queue failure: {0}")]
    Queue(#[from] QueueError),

    /// A start-condition edge referenced a job outside its own pipeline,
    /// or the edge set is not a DAG (spec §3 invariant).
    #[error("malformed start-condition graph for pipeline {pipeline_id}: {message}")]
    MalformedGraph { pipeline_id: i64, message: String },

    /// The import descriptor referenced a job id it never defined.
    #[error("import descriptor references unknown source job id {0}")]
    UnknownSourceJobId(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("submission rejected: {0}")]
    Rejected(String),
}
