//! Durable storage for jobs and their items.

mod in_memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use forgejobs_core::JobId;
use forgejobs_jobs::{Job, SearchJobs};

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job persistence.
///
/// Implementations must give read-your-writes: a `get_by_id` right after a
/// successful `add`/`update` returns what was written. `update` replaces the
/// job row and every item row atomically.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn add(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    async fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Newest first. Returns the page plus the total number of matches.
    async fn search(&self, filter: &SearchJobs) -> Result<(Vec<Job>, u64), JobStoreError>;
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn add(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).add(job).await
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get_by_id(id).await
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job).await
    }

    async fn search(&self, filter: &SearchJobs) -> Result<(Vec<Job>, u64), JobStoreError> {
        (**self).search(filter).await
    }
}
