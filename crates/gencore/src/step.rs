use crate::{JobId, StepError, StepId, Value};
use async_trait::async_trait;
use std::collections::HashMap;

/// Core capability every pipeline step implements.
///
/// Steps are opaque to the executor: it only requires that `execute`
/// either returns named outputs or raises a typed `StepError`. Steps must
/// tolerate re-execution with the same inputs when a retry budget is
/// configured for their type.
#[async_trait]
pub trait Step: Send + Sync {
    /// Type tag this step registers under (e.g. "prompt.enhance").
    fn step_type(&self) -> &str;

    async fn execute(&self, ctx: StepContext) -> Result<StepOutput, StepError>;
}

/// Inputs handed to one step execution attempt.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: JobId,
    pub step_id: StepId,
    /// Resolved values for the step's declared inputs.
    pub inputs: HashMap<String, Value>,
    /// Static parameters from the step's template spec.
    pub parameters: HashMap<String, Value>,
}

impl StepContext {
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn require_input(&self, name: &str) -> Result<&Value, StepError> {
        self.inputs
            .get(name)
            .ok_or_else(|| StepError::MissingInput(name.to_string()))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, StepError> {
        self.require_input(name)?
            .as_str()
            .ok_or_else(|| StepError::InvalidInput {
                name: name.to_string(),
                expected: "string".to_string(),
            })
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    pub fn param_or(&self, name: &str, default: Value) -> Value {
        self.parameters.get(name).cloned().unwrap_or(default)
    }
}

/// Named outputs produced by a successful step execution.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub outputs: HashMap<String, Value>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}
