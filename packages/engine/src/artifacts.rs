//! Artifact availability, as seen by the dependency resolver.

use async_trait::async_trait;
use chrono::Utc;
use ci_core::Job;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether `job`'s artifacts can still be downloaded by dependents.
    async fn valid(&self, job: &Job) -> bool;
}

/// Judges artifacts by the job's expiry and erasure timestamps.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpiryArtifactStore;

#[async_trait]
impl ArtifactStore for ExpiryArtifactStore {
    async fn valid(&self, job: &Job) -> bool {
        !job.artifacts_unavailable_at(Utc::now())
    }
}
