use async_trait::async_trait;
use gencore::{seed, Step, StepContext, StepError, StepOutput, Value};
use genruntime::StepFactory;
use std::collections::HashMap;

pub const IMAGE_INPUT: &str = "image.input";

/// Entry point for img2img pipelines: picks up the source image reference
/// from an upstream `image_data` output or from the job's `input_image`
/// parameter and hands it downstream as `processed_image`.
pub struct ImageInputStep;

#[async_trait]
impl Step for ImageInputStep {
    fn step_type(&self) -> &str {
        IMAGE_INPUT
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let image = match ctx.input("image_data") {
            Some(value) if !value.is_null() => value.clone(),
            _ => ctx
                .input(seed::PARAMETERS)
                .and_then(Value::as_object)
                .and_then(|params| params.get("input_image"))
                .filter(|value| !value.is_null())
                .cloned()
                .ok_or_else(|| StepError::MissingInput("input_image".to_string()))?,
        };

        let preprocessing = ctx
            .param("preprocessing")
            .and_then(Value::as_str)
            .unwrap_or("none")
            .to_string();

        // Preprocessing is a pass-through until a real image service backs it.
        Ok(StepOutput::new()
            .with("processed_image", image.clone())
            .with("original_image", image)
            .with("preprocessing_applied", preprocessing))
    }
}

pub struct ImageInputStepFactory;

impl StepFactory for ImageInputStepFactory {
    fn step_type(&self) -> &str {
        IMAGE_INPUT
    }

    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(ImageInputStep))
    }
}
