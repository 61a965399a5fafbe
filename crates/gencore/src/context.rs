use crate::{seed, EngineError, JobId, StepId, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Per-job scratch space, exclusively owned by one executor run.
///
/// The artifact map is append-only: each name is written at most once
/// during a run, and a collision signals a compiler or implementation bug.
pub struct ExecutionContext {
    pub job_id: JobId,
    artifacts: HashMap<String, Value>,
    cancellation: CancellationToken,
    progress: u8,
}

impl ExecutionContext {
    pub fn new(job_id: JobId, cancellation: CancellationToken) -> Self {
        Self {
            job_id,
            artifacts: HashMap::new(),
            cancellation,
            progress: 0,
        }
    }

    /// Place the job's seed inputs into the artifact map before any step
    /// runs. Seed names are reserved; the compiler rejects outputs that
    /// would collide with them.
    pub fn seed(&mut self, prompt: String, parameters: HashMap<String, Value>) {
        self.artifacts
            .insert(seed::PROMPT.to_string(), Value::String(prompt));
        self.artifacts
            .insert(seed::PARAMETERS.to_string(), Value::Object(parameters));
    }

    pub fn artifact(&self, name: &str) -> Option<&Value> {
        self.artifacts.get(name)
    }

    /// Commit one step output. Write-once: an existing name is an
    /// invariant breach, fatal to the job and never retried.
    pub fn commit_artifact(
        &mut self,
        step_id: &StepId,
        name: String,
        value: Value,
    ) -> Result<(), EngineError> {
        if self.artifacts.contains_key(&name) {
            return Err(EngineError::DuplicateArtifact {
                step_id: step_id.clone(),
                name,
            });
        }
        self.artifacts.insert(name, value);
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Non-decreasing within a run.
    pub fn advance_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress);
    }
}
