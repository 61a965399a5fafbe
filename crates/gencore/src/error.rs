use crate::{JobId, StepId, TemplateId};
use thiserror::Error;

/// Template rejected at compile time; the job never reaches `processing`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("step '{step_id}' reads '{name}', which no earlier step or seed input produces")]
    UnknownInput { step_id: StepId, name: String },

    #[error("output '{name}' is already produced earlier in the pipeline")]
    DuplicateOutput { name: String },

    #[error("unknown step type '{step_type}' in step '{step_id}'")]
    UnknownStepType { step_id: StepId, step_type: String },

    #[error("template pipeline declares no steps")]
    EmptyPipeline,

    #[error("dependency cycle in compiled pipeline")]
    Cycle,
}

/// Failure raised by a single step execution attempt.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("invalid input '{name}': expected {expected}")]
    InvalidInput { name: String, expected: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("backend call failed: {0}")]
    Backend(String),

    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// Failure surfaced by a job queue adapter. Never silently dropped.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Engine-level failures outside the per-job status taxonomy.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("step '{step_id}' produced artifact '{name}', which already exists")]
    DuplicateArtifact { step_id: StepId, name: String },

    #[error("template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("step task panicked: {0}")]
    TaskPanicked(String),
}
