//! Durable post-commit jobs (the outbox).
//!
//! Order mutations enqueue their side effects (invoice/receipt generation,
//! notifications) inside the committing transaction; the executor drains the
//! queue asynchronously with retry and a dead-letter queue. Losing the
//! process between commit and execution loses nothing.

pub mod executor;
pub mod handlers;
pub mod store;
pub mod types;

pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle};
pub use handlers::register_engine_handlers;
pub use store::{JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobAttemptRecord, JobId, JobKind, JobResult, JobStatus,
    RetryPolicy,
};
