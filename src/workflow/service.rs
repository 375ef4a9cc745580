use anyhow::Result;
use async_trait::async_trait;

use crate::workflow::types::{ArtifactRef, GenerationRequest, ServiceOutput};

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Runs one generation. `Ok(None)` means the service answered without output.
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Option<ServiceOutput>>;

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>>;
}
