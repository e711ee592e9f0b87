//! External video generation provider.

use async_trait::async_trait;

use crate::{generations::repo_types::GenerationKind, schemas::VideoSettings};

mod replicate;

pub use replicate::ReplicateClient;

/// What the provider needs to render one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderJob {
    pub kind: GenerationKind,
    pub prompt: String,
    pub image_url: Option<String>,
    pub settings: VideoSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Queued or rendering.
    Running,
    Succeeded { video_url: Option<String> },
    Failed { reason: String },
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Submits a job and returns the provider's id for it.
    async fn submit(&self, job: &ProviderJob) -> anyhow::Result<String>;
    async fn poll(&self, provider_id: &str) -> anyhow::Result<ProviderStatus>;
}
