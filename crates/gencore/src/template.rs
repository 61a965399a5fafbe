use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

pub type TemplateId = Uuid;

/// Identifier of a step within one template's pipeline.
pub type StepId = String;

/// Names the job seeds into every run before any step executes.
pub mod seed {
    pub const PROMPT: &str = "prompt";
    pub const PARAMETERS: &str = "parameters";

    pub const ALL: [&str; 2] = [PROMPT, PARAMETERS];
}

/// Declarative generation template: an ordered pipeline of step
/// specifications. Immutable once loaded for a run; the engine only ever
/// reads a snapshot owned by the template store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub category: String,
    pub pipeline: Vec<StepSpec>,
}

impl Template {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: category.into(),
            pipeline: Vec::new(),
        }
    }

    pub fn add_step(&mut self, spec: StepSpec) -> &mut Self {
        self.pipeline.push(spec);
        self
    }

    pub fn with_step(mut self, spec: StepSpec) -> Self {
        self.pipeline.push(spec);
        self
    }
}

/// One step in a template's pipeline.
///
/// `inputs` must each be satisfied by an earlier step's declared output or
/// by a seed name; the compiler validates this before any execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: StepId,
    pub step_type: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub inputs: BTreeSet<String>,
    #[serde(default)]
    pub outputs: BTreeSet<String>,
    /// Overrides the step type's registered retry budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Overrides the step type's registered timeout, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepSpec {
    pub fn new(id: impl Into<StepId>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            parameters: HashMap::new(),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            max_attempts: None,
            timeout_ms: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn reads(mut self, name: impl Into<String>) -> Self {
        self.inputs.insert(name.into());
        self
    }

    pub fn writes(mut self, name: impl Into<String>) -> Self {
        self.outputs.insert(name.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}
