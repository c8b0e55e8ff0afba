//! Job queue storage abstraction.
//!
//! Enqueueing happens through [`crate::store::Uow::enqueue_job`] so the
//! outbox write commits with the business transaction; this trait is the
//! executor-facing side of the queue. Both backends implement it.

use async_trait::async_trait;

use super::types::{DeadLetterEntry, Job, JobId};

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Executor-side view of the job queue.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Claim the next ready pending/failed job, marking it running.
    /// Returns `None` when nothing is ready.
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    /// Persist a job's state after an execution attempt.
    async fn update_job(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Move a job to the dead-letter queue.
    async fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError>;

    /// Inspect the dead-letter queue (operator surface).
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    /// Number of jobs still claimable (pending or awaiting retry).
    async fn pending_jobs(&self) -> Result<usize, JobStoreError>;
}
