//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use grainlify_core::FailureKind;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus};

/// Handles one kind of job.
///
/// Errors are recorded on the job and drive its retry policy; they never stop
/// the executor.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        (self)(job.clone()).await
    }
}

/// Handlers keyed by job kind.
///
/// Lookup order: exact kind, then a `prefix.*` pattern, then `*`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, pattern: impl Into<String>, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(pattern.into(), Arc::new(handler));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn JobHandler>> {
        if let Some(h) = self.handlers.get(kind) {
            return Some(h.clone());
        }

        // Longest matching prefix wins: "github.sync.*" beats "github.*".
        let prefixed = self
            .handlers
            .iter()
            .filter_map(|(pattern, h)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = kind.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), h))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, h)| h.clone());

        prefixed.or_else(|| self.handlers.get("*").cloned())
    }
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How long to sleep when no job is ready
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
    /// Consecutive store failures after which the executor gives up
    pub max_store_failures: u32,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            name: "sync-worker".to_string(),
            max_store_failures: 10,
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

    pub fn with_max_store_failures(mut self, n: u32) -> Self {
        self.max_store_failures = n.max(1);
        self
    }
}

/// Why a worker stopped unsuccessfully.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("job store failed {failures} times in a row: {source}")]
    Store {
        failures: u32,
        #[source]
        source: JobStoreError,
    },

    #[error("worker task panicked: {0}")]
    Panicked(String),

    #[error("worker task ended without reporting a result")]
    Vanished,
}

impl WorkerError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Worker
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub uptime_secs: u64,
}

/// Shared view of a running executor's statistics.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    inner: Arc<Mutex<ExecutorStats>>,
    started: Instant,
}

impl StatsHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ExecutorStats::default())),
            started: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> ExecutorStats {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    fn record(&self, job: &Job, result: &Result<(), String>) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
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
}

/// Background job executor.
///
/// Polls a job store for ready jobs, runs them with registered handlers, and
/// records retries and dead-lettering on the job itself.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: HandlerRegistry,
    config: JobExecutorConfig,
    stats: StatsHandle,
}

impl core::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>, handlers: HandlerRegistry, config: JobExecutorConfig) -> Self {
        Self {
            store,
            handlers,
            config,
            stats: StatsHandle::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Poll until cancelled.
    ///
    /// Returns `Ok(())` after cancellation, or an error once the store has
    /// failed `max_store_failures` times in a row.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), WorkerError> {
        let name = self.config.name.clone();
        info!(executor = %name, "job executor started");

        let mut store_failures: u32 = 0;

        while !cancel.is_cancelled() {
            match self.store.claim_next().await {
                Ok(Some(mut job)) => {
                    store_failures = 0;
                    debug!(executor = %name, job_id = %job.id, kind = %job.kind, "claimed job");

                    let result = self.execute(&mut job).await;
                    self.stats.record(&job, &result);

                    if let Err(e) = result {
                        debug!(
                            executor = %name,
                            job_id = %job.id,
                            error = %e,
                            status = job.status.as_str(),
                            "job execution failed"
                        );
                    }
                    continue;
                }
                Ok(None) => store_failures = 0,
                Err(e) => {
                    store_failures += 1;
                    error!(executor = %name, error = %e, failures = store_failures, "failed to claim job");
                    if store_failures >= self.config.max_store_failures {
                        return Err(WorkerError::Store {
                            failures: store_failures,
                            source: e,
                        });
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(executor = %name, "job executor stopped");
        Ok(())
    }

    /// Run one claimed job and persist the outcome.
    pub async fn execute(&self, job: &mut Job) -> Result<(), String> {
        let Some(handler) = self.handlers.get(&job.kind) else {
            let error = format!("no handler for job kind: {}", job.kind);
            warn!(job_id = %job.id, error = %error, "no handler for job");
            job.mark_failed(error.clone());
            self.store.update(job).await.map_err(|e| e.to_string())?;
            return Err(error);
        };

        match handler.handle(job).await {
            Ok(()) => {
                job.mark_completed();
                self.store.update(job).await.map_err(|e| e.to_string())?;
                debug!(job_id = %job.id, "job completed successfully");
                Ok(())
            }
            Err(e) => {
                let error = format!("{e:#}");
                job.mark_failed(error.clone());
                self.store.update(job).await.map_err(|e| e.to_string())?;

                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                    warn!(job_id = %job.id, error = %error, "job dead-lettered");
                }
                Err(error)
            }
        }
    }
}
