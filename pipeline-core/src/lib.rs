//! DAG-driven pipeline/job execution core.
//!
//! A pipeline owns a set of jobs connected by start-condition edges
//! (`success`/`fail`/`whatever`); starting a pipeline drives its jobs
//! through dispatch, worker callbacks and dependent propagation until every
//! sink job reaches a terminal status, at which point the pipeline's own
//! status is derived and a notification is sent. See `job` and `pipeline`
//! for the two state machines (C4/C5), `param` for the per-job expression
//! resolver (C1), and `engine` for the facade tying every component
//! together.

pub mod cache;
pub mod engine;
pub mod error;
pub mod expr;
pub mod import;
pub mod job;
pub mod model;
pub mod notify;
pub mod param;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod store_memory;

pub use engine::PipelineEngine;
pub use error::PipelineError;
