//! Generation pipeline runtime
//!
//! This crate provides the engine proper: the step registry, the pipeline
//! compiler that turns a template into an executable DAG, the executor
//! state machine with retry and cooperative cancellation, the job queue
//! contract with an in-memory implementation, and the worker pool that
//! drives leased jobs through fresh executor runs.

mod compiler;
mod engine;
mod executor;
mod queue;
mod registry;
mod store;
mod worker;

pub use compiler::{PipelineCompiler, PipelineDag, StepNode};
pub use engine::{Engine, EngineConfig};
pub use executor::{Executor, JobOutcome, NodeState};
pub use queue::{InMemoryQueue, JobQueue, LeasedJob};
pub use registry::{StepFactory, StepPolicy, StepRegistry};
pub use store::{InMemoryTemplateStore, TemplateStore};
pub use worker::{WorkerPool, WorkerPoolConfig};
