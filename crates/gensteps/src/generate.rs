use crate::backend::{GenerateRequest, InferenceBackend};
use crate::codec;
use async_trait::async_trait;
use gencore::{seed, Step, StepContext, StepError, StepOutput, Value};
use genruntime::{StepFactory, StepPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const GENERATE: &str = "image.generate";

/// Calls the injected inference backend. Generation parameters come from
/// the template's step spec, overridden per job by the `parameters` seed
/// when the template wires it in.
pub struct GenerateStep {
    backend: Arc<dyn InferenceBackend>,
}

impl GenerateStep {
    fn request(&self, ctx: &StepContext) -> GenerateRequest {
        let mut request = GenerateRequest::default();

        request.prompt = ctx
            .input("enhanced_prompt")
            .or_else(|| ctx.input(seed::PROMPT))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        request.negative_prompt = ctx
            .input("negative_prompt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Template defaults first, then per-job overrides.
        apply_overrides(&mut request, &ctx.parameters);
        if let Some(overrides) = ctx.input(seed::PARAMETERS).and_then(Value::as_object) {
            apply_overrides(&mut request, overrides);
        }
        request
    }
}

fn apply_overrides(request: &mut GenerateRequest, params: &HashMap<String, Value>) {
    if let Some(width) = params.get("width").and_then(Value::as_u64) {
        request.width = width as u32;
    }
    if let Some(height) = params.get("height").and_then(Value::as_u64) {
        request.height = height as u32;
    }
    if let Some(steps) = params.get("steps").and_then(Value::as_u64) {
        request.steps = steps as u32;
    }
    if let Some(cfg_scale) = params.get("cfg_scale").and_then(Value::as_f64) {
        request.cfg_scale = cfg_scale;
    }
    if let Some(model) = params.get("model").and_then(Value::as_str) {
        request.model = model.to_string();
    }
    if let Some(num_images) = params.get("num_images").and_then(Value::as_u64) {
        request.num_images = (num_images as u32).clamp(1, 4);
    }
    if let Some(seed) = params.get("seed").and_then(Value::as_u64) {
        request.seed = Some(seed);
    }
    if let Some(negative) = params.get("negative_prompt").and_then(Value::as_str) {
        if request.negative_prompt.is_empty() {
            request.negative_prompt = negative.to_string();
        }
    }
}

#[async_trait]
impl Step for GenerateStep {
    fn step_type(&self) -> &str {
        GENERATE
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let request = self.request(&ctx);
        if request.prompt.is_empty() {
            return Err(StepError::MissingInput("enhanced_prompt".to_string()));
        }

        tracing::debug!(job_id = %ctx.job_id, model = %request.model, "Requesting generation");
        let metadata = codec::encode(&request)?;
        let images = self.backend.generate(request).await?;

        Ok(StepOutput::new()
            .with("images", codec::encode(&images)?)
            .with("generation_metadata", metadata))
    }
}

pub struct GenerateStepFactory {
    backend: Arc<dyn InferenceBackend>,
}

impl GenerateStepFactory {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

impl StepFactory for GenerateStepFactory {
    fn step_type(&self) -> &str {
        GENERATE
    }

    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(GenerateStep {
            backend: Arc::clone(&self.backend),
        }))
    }

    fn policy(&self) -> StepPolicy {
        // Inference is slow; bound one attempt rather than retrying a
        // non-idempotent call by default.
        StepPolicy::default().with_timeout(Duration::from_secs(300))
    }
}
