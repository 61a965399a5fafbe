use crate::backend::{GeneratedImage, InferenceBackend, UpscaleRequest};
use crate::codec;
use async_trait::async_trait;
use gencore::{Step, StepContext, StepError, StepOutput, Value};
use genruntime::{StepFactory, StepPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const UPSCALE: &str = "image.upscale";

pub struct UpscaleStep {
    backend: Arc<dyn InferenceBackend>,
}

#[async_trait]
impl Step for UpscaleStep {
    fn step_type(&self) -> &str {
        UPSCALE
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let images: Vec<GeneratedImage> = codec::decode("images", ctx.require_input("images")?)?;
        if images.is_empty() {
            return Err(StepError::InvalidInput {
                name: "images".to_string(),
                expected: "at least one generated image".to_string(),
            });
        }

        let request = UpscaleRequest {
            images,
            scale_factor: ctx
                .param("scale_factor")
                .and_then(Value::as_u64)
                .unwrap_or(2) as u32,
            model: ctx
                .param("upscaler_model")
                .and_then(Value::as_str)
                .unwrap_or("RealESRGAN_x4plus")
                .to_string(),
        };

        tracing::debug!(job_id = %ctx.job_id, model = %request.model, "Requesting upscale");
        let upscaled = self.backend.upscale(request).await?;

        Ok(StepOutput::new().with("upscaled_images", codec::encode(&upscaled)?))
    }
}

pub struct UpscaleStepFactory {
    backend: Arc<dyn InferenceBackend>,
}

impl UpscaleStepFactory {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

impl StepFactory for UpscaleStepFactory {
    fn step_type(&self) -> &str {
        UPSCALE
    }

    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(UpscaleStep {
            backend: Arc::clone(&self.backend),
        }))
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::default().with_timeout(Duration::from_secs(120))
    }
}
