use crate::backend::{
    ArtifactStore, GenerateRequest, GeneratedImage, InferenceBackend, StoredArtifact,
    UpscaleRequest,
};
use async_trait::async_trait;
use gencore::{JobId, StepError};

/// Deterministic stand-in for a real inference service. Used by the CLI
/// and the test suite; swapped out for a real backend in deployment.
#[derive(Default)]
pub struct StubInferenceBackend;

#[async_trait]
impl InferenceBackend for StubInferenceBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<Vec<GeneratedImage>, StepError> {
        let seed = request.seed.unwrap_or(12345);
        Ok((0..request.num_images.max(1))
            .map(|index| GeneratedImage {
                data_ref: format!(
                    "generated/{}x{}/{}-{}",
                    request.width, request.height, seed, index
                ),
                seed: seed + u64::from(index),
                model: request.model.clone(),
            })
            .collect())
    }

    async fn upscale(&self, request: UpscaleRequest) -> Result<Vec<GeneratedImage>, StepError> {
        Ok(request
            .images
            .into_iter()
            .map(|image| GeneratedImage {
                data_ref: format!("{}@x{}", image.data_ref, request.scale_factor),
                model: request.model.clone(),
                ..image
            })
            .collect())
    }
}

/// Artifact store that mints URLs without uploading anything.
pub struct StubArtifactStore {
    base_url: String,
}

impl StubArtifactStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for StubArtifactStore {
    fn default() -> Self {
        Self::new("https://storage.invalid")
    }
}

#[async_trait]
impl ArtifactStore for StubArtifactStore {
    async fn store(
        &self,
        job_id: JobId,
        index: usize,
        _image: &GeneratedImage,
    ) -> Result<StoredArtifact, StepError> {
        Ok(StoredArtifact {
            url: format!("{}/images/{}_{}.png", self.base_url, job_id, index),
            thumbnail_url: Some(format!(
                "{}/thumbnails/{}_{}.png",
                self.base_url, job_id, index
            )),
        })
    }
}
