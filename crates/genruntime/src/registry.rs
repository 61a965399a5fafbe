use gencore::{Step, StepError, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-step-type execution policy.
///
/// Steps are assumed to be non-idempotent calls to external services, so
/// the default budget is a single attempt with no timeout. A `StepSpec`
/// may override both fields per pipeline.
#[derive(Debug, Clone, Copy)]
pub struct StepPolicy {
    pub max_attempts: u32,
    pub timeout: Option<Duration>,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            timeout: None,
        }
    }
}

impl StepPolicy {
    pub fn with_retries(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Factory for one step type. New step types are added by registering a
/// factory; the executor stays agnostic to step semantics.
pub trait StepFactory: Send + Sync {
    fn step_type(&self) -> &str;

    /// Build a step instance for one node. The instance is reused across
    /// retry attempts of that node but never across nodes.
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Step>, StepError>;

    fn policy(&self) -> StepPolicy {
        StepPolicy::default()
    }
}

/// Maps a step-type tag to its factory and policy.
#[derive(Default)]
pub struct StepRegistry {
    factories: HashMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn StepFactory>) {
        let step_type = factory.step_type().to_string();
        tracing::info!("Registering step type: {}", step_type);
        self.factories.insert(step_type, factory);
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    pub fn create(
        &self,
        step_type: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<Box<dyn Step>, StepError> {
        let factory = self
            .factories
            .get(step_type)
            .ok_or_else(|| StepError::InvalidParameter(format!("unknown step type: {step_type}")))?;
        factory.create(parameters)
    }

    pub fn policy(&self, step_type: &str) -> StepPolicy {
        self.factories
            .get(step_type)
            .map(|f| f.policy())
            .unwrap_or_default()
    }

    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}
