//! Job executor with retry and backoff.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::store::JobStore;
use super::types::{Job, JobKind, JobResult, JobStatus};

pub type JobFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;
pub type JobHandler = Arc<dyn Fn(Job) -> JobFuture + Send + Sync>;

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs.
    pub poll_interval: Duration,
    /// Name for logging.
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
}

/// Handle to control a running executor.
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: Option<tokio::task::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for the loop to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Background job executor.
///
/// Polls the job store for claimable jobs, runs the registered handler, and
/// applies retry/dead-letter policy.
pub struct JobExecutor<S> {
    store: Arc<S>,
    handlers: HashMap<String, JobHandler>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register an async handler for a job kind pattern.
    ///
    /// Patterns are the kind type name, a category wildcard (`billing.*`), or
    /// the global `*`.
    pub fn register_handler<F, Fut>(&mut self, kind_pattern: impl Into<String>, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |job| Box::pin(handler(job)) as JobFuture);
        self.handlers.insert(kind_pattern.into(), handler);
    }

    fn get_handler(&self, kind: &JobKind) -> Option<&JobHandler> {
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    /// Execute a single already-claimed job (also used directly by tests).
    pub async fn execute_one(&self, job: &mut Job) -> Result<(), String> {
        let handler = self
            .get_handler(&job.kind)
            .ok_or_else(|| format!("no handler for job kind: {:?}", job.kind))?
            .clone();

        let started = Utc::now();
        let result = handler(job.clone()).await;

        match result {
            JobResult::Success => {
                job.mark_completed(started);
                self.store.update_job(job).await.map_err(|e| e.to_string())?;
                debug!(job_id = %job.id, "job completed");
                Ok(())
            }
            JobResult::Failure(error) => {
                job.mark_failed(error.clone(), started);
                self.store.update_job(job).await.map_err(|e| e.to_string())?;

                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                    warn!(job_id = %job.id, error = %error, "job dead-lettered");
                    self.store
                        .dead_letter(job.clone(), error.clone())
                        .await
                        .ok();
                }

                Err(error)
            }
            JobResult::RetryAfter(delay) => {
                job.mark_failed("retry after delay".to_string(), started);
                job.scheduled_at =
                    Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
                self.store.update_job(job).await.map_err(|e| e.to_string())?;
                Err("retry after delay".to_string())
            }
        }
    }

    /// Spawn the executor loop as a background task.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let stats_clone = stats.clone();

        let join = tokio::spawn(async move {
            info!(executor = %config.name, "job executor started");

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match self.store.claim_next().await {
                    Ok(Some(mut job)) => {
                        debug!(executor = %config.name, job_id = %job.id, kind = ?job.kind, "claimed job");
                        let result = self.execute_one(&mut job).await;

                        let mut s = stats_clone.lock().unwrap();
                        s.jobs_processed += 1;
                        match result {
                            Ok(()) => s.jobs_succeeded += 1,
                            Err(_) => {
                                s.jobs_failed += 1;
                                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                                    s.jobs_dead_lettered += 1;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(config.poll_interval) => {}
                            changed = shutdown_rx.changed() => {
                                // A closed channel means the handle is gone.
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(executor = %config.name, error = ?e, "failed to claim job");
                        tokio::time::sleep(config.poll_interval).await;
                    }
                }
            }

            info!(executor = %config.name, "job executor stopped");
        });

        JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}
