use async_trait::async_trait;
use gencore::{JobId, StepError};
use serde::{Deserialize, Serialize};

/// One generated image as passed between pipeline steps. `data_ref` is an
/// opaque handle into the backend's output space, not image bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub data_ref: String,
    pub seed: u64,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    pub model: String,
    pub num_images: u32,
    pub seed: Option<u64>,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            width: 1024,
            height: 1024,
            steps: 50,
            cfg_scale: 7.5,
            model: "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
            num_images: 1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpscaleRequest {
    pub images: Vec<GeneratedImage>,
    pub scale_factor: u32,
    pub model: String,
}

/// Reference to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Opaque inference service: potentially slow, potentially failing. The
/// engine only requires typed outputs or a typed `StepError`.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<Vec<GeneratedImage>, StepError>;

    async fn upscale(&self, request: UpscaleRequest) -> Result<Vec<GeneratedImage>, StepError>;
}

/// Opaque object-storage service for generated artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(
        &self,
        job_id: JobId,
        index: usize,
        image: &GeneratedImage,
    ) -> Result<StoredArtifact, StepError>;
}
