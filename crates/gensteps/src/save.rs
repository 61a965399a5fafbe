use crate::backend::{ArtifactStore, GeneratedImage};
use crate::codec;
use async_trait::async_trait;
use gencore::{Step, StepContext, StepError, StepOutput, Value};
use genruntime::StepFactory;
use std::collections::HashMap;
use std::sync::Arc;

pub const SAVE_ARTIFACTS: &str = "artifact.save";

/// Uploads generated images and returns their references. Reads
/// `upscaled_images` when the template wires an upscaler in front,
/// otherwise `images`.
pub struct SaveArtifactsStep {
    store: Arc<dyn ArtifactStore>,
}

#[async_trait]
impl Step for SaveArtifactsStep {
    fn step_type(&self) -> &str {
        SAVE_ARTIFACTS
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let source = ctx
            .input("upscaled_images")
            .or_else(|| ctx.input("images"))
            .ok_or_else(|| StepError::MissingInput("images".to_string()))?;
        let images: Vec<GeneratedImage> = codec::decode("images", source)?;
        if images.is_empty() {
            return Err(StepError::InvalidInput {
                name: "images".to_string(),
                expected: "at least one generated image".to_string(),
            });
        }

        let mut saved = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let artifact = self.store.store(ctx.job_id, index, image).await?;
            tracing::debug!(job_id = %ctx.job_id, url = %artifact.url, "Artifact stored");
            saved.push(artifact);
        }

        let count = saved.len();
        Ok(StepOutput::new()
            .with("saved_images", codec::encode(&saved)?)
            .with("image_count", count as i64))
    }
}

pub struct SaveArtifactsStepFactory {
    store: Arc<dyn ArtifactStore>,
}

impl SaveArtifactsStepFactory {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

impl StepFactory for SaveArtifactsStepFactory {
    fn step_type(&self) -> &str {
        SAVE_ARTIFACTS
    }

    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(SaveArtifactsStep {
            store: Arc::clone(&self.store),
        }))
    }
}
