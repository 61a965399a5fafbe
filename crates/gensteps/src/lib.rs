//! Built-in step library
//!
//! The steps observed in this domain: prompt augmentation, image input
//! for img2img pipelines, image generation against an injected inference
//! backend, upscaling, and artifact persistence against an injected
//! store. The executor is agnostic to all of them; new step types
//! register a factory.

mod backend;
mod generate;
mod input;
mod prompt;
mod save;
mod stub;
mod upscale;

pub use backend::{
    ArtifactStore, GenerateRequest, GeneratedImage, InferenceBackend, StoredArtifact,
    UpscaleRequest,
};
pub use generate::{GenerateStep, GenerateStepFactory};
pub use input::{ImageInputStep, ImageInputStepFactory};
pub use prompt::{PromptEnhanceStep, PromptEnhanceStepFactory};
pub use save::{SaveArtifactsStep, SaveArtifactsStepFactory};
pub use stub::{StubArtifactStore, StubInferenceBackend};
pub use upscale::{UpscaleStep, UpscaleStepFactory};

use genruntime::StepRegistry;
use std::sync::Arc;

/// Register every built-in step type against the given backends.
pub fn register_builtin(
    registry: &mut StepRegistry,
    backend: Arc<dyn InferenceBackend>,
    store: Arc<dyn ArtifactStore>,
) {
    registry.register(Arc::new(PromptEnhanceStepFactory));
    registry.register(Arc::new(ImageInputStepFactory));
    registry.register(Arc::new(GenerateStepFactory::new(backend.clone())));
    registry.register(Arc::new(UpscaleStepFactory::new(backend)));
    registry.register(Arc::new(SaveArtifactsStepFactory::new(store)));
}

pub(crate) mod codec {
    use gencore::{StepError, Value};
    use serde::de::DeserializeOwned;
    use serde::Serialize;

    pub fn encode<T: Serialize>(value: &T) -> Result<Value, StepError> {
        serde_json::to_value(value)
            .map(Value::from_json)
            .map_err(|e| StepError::Backend(format!("encoding output failed: {e}")))
    }

    pub fn decode<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T, StepError> {
        serde_json::from_value(value.to_json()).map_err(|_| StepError::InvalidInput {
            name: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
        })
    }
}
