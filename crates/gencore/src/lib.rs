//! Core abstractions for the generation pipeline engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: the dynamic value type, template and job models,
//! the `Step` capability, the per-job execution context, the error
//! taxonomy, and the progress publishing contract.

mod context;
mod error;
mod events;
mod job;
mod step;
mod template;
mod value;

pub use context::ExecutionContext;
pub use error::{CompileError, EngineError, QueueError, StepError};
pub use events::{JobProgress, ProgressBus, ProgressPublisher};
pub use job::{
    Job, JobError, JobErrorKind, JobId, JobStatus, JobUpdate, SubmitRequest,
};
pub use step::{Step, StepContext, StepOutput};
pub use template::{seed, StepId, StepSpec, Template, TemplateId};
pub use value::Value;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
