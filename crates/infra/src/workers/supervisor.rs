//! In-process background worker lifecycle.
//!
//! With an event bus configured, jobs are consumed by an external worker
//! process and nothing runs here. Without a bus but with a database, the sync
//! job executor runs as a task in this process. Its completion is delivered
//! through a oneshot channel so the caller can race it against other
//! termination events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Instrument, error, info, warn};

use crate::db::DatabaseHandle;
use crate::jobs::{
    ExecutorStats, HandlerRegistry, JobExecutor, JobExecutorConfig, JobStore, PostgresJobStore, StatsHandle,
    WorkerError,
};

/// Whether to run the in-process worker, and why not.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerDecision {
    Start,
    /// An external worker consumes from the bus.
    SkipBusConfigured,
    /// Jobs live in the database; nothing to poll without one.
    SkipNoDatabase,
}

impl WorkerDecision {
    pub fn decide(has_bus: bool, has_db: bool) -> Self {
        if has_bus {
            Self::SkipBusConfigured
        } else if !has_db {
            Self::SkipNoDatabase
        } else {
            Self::Start
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            WorkerDecision::Start => "no event bus configured; running jobs in-process",
            WorkerDecision::SkipBusConfigured => "event bus configured; an external worker consumes jobs",
            WorkerDecision::SkipNoDatabase => "no database; nothing to poll",
        }
    }
}

/// Handle to a spawned worker task.
#[derive(Debug)]
pub struct RunningWorker {
    name: String,
    cancel: CancellationToken,
    completion: Option<oneshot::Receiver<Result<(), WorkerError>>>,
    join: Option<JoinHandle<()>>,
    stats: StatsHandle,
}

impl RunningWorker {
    /// Spawn `executor` on the current runtime, carrying the current span and
    /// dispatch into the task.
    pub fn spawn(executor: JobExecutor) -> Self {
        let name = executor.name().to_string();
        let stats = executor.stats();
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        let token = cancel.clone();
        let join = tokio::spawn(
            async move {
                let result = executor.run(token).await;
                // Nobody listening any more is fine.
                let _ = tx.send(result);
            }
            .in_current_span()
            .with_current_subscriber(),
        );

        Self {
            name,
            cancel,
            completion: Some(rx),
            join: Some(join),
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.snapshot()
    }

    /// Resolves once the worker finishes, with its result.
    ///
    /// Cancel-safe. After it has resolved once, later calls never resolve.
    pub async fn completed(&mut self) -> Result<(), WorkerError> {
        let Some(rx) = self.completion.as_mut() else {
            return std::future::pending().await;
        };

        let received = rx.await;
        self.completion = None;

        match received {
            Ok(result) => result,
            // The sender only disappears without sending if the task died.
            Err(_) => match self.join.take() {
                Some(join) => match join.await {
                    Err(e) if e.is_panic() => Err(WorkerError::Panicked(e.to_string())),
                    _ => Err(WorkerError::Vanished),
                },
                None => Err(WorkerError::Vanished),
            },
        }
    }

    /// Ask the worker to stop after its current job.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait up to `timeout` for the task to exit.
    ///
    /// Returns false if the task had to be abandoned.
    pub async fn stop_and_wait(mut self, timeout: Duration) -> bool {
        self.stop();

        let Some(join) = self.join.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(())) => {
                if let Some(Ok(Err(e))) = self.completion.as_mut().map(|rx| rx.try_recv()) {
                    warn!(worker = %self.name, error = %e, "worker reported an error while stopping");
                }
                info!(worker = %self.name, "worker stopped");
                true
            }
            Ok(Err(e)) => {
                error!(worker = %self.name, error = %e, "worker task failed while stopping");
                true
            }
            Err(_) => {
                warn!(worker = %self.name, timeout_secs = timeout.as_secs(), "worker did not stop in time; abandoning");
                false
            }
        }
    }
}

/// Decides whether to start the in-process worker and starts it.
#[derive(Debug, Clone)]
pub struct WorkerSupervisor {
    handlers: HandlerRegistry,
    config: JobExecutorConfig,
}

impl WorkerSupervisor {
    pub fn new(handlers: HandlerRegistry, config: JobExecutorConfig) -> Self {
        Self { handlers, config }
    }

    /// Start the worker iff no bus is configured and a database is present.
    pub fn maybe_start(&self, has_bus: bool, database: Option<&DatabaseHandle>) -> Option<RunningWorker> {
        let decision = WorkerDecision::decide(has_bus, database.is_some());

        match (decision, database) {
            (WorkerDecision::Start, Some(db)) => {
                info!(reason = decision.reason(), "starting background worker");
                Some(self.start_with(Arc::new(PostgresJobStore::new(db.pool().clone()))))
            }
            _ => {
                info!(reason = decision.reason(), "background worker not started");
                None
            }
        }
    }

    /// Start a worker over an explicit store.
    pub fn start_with(&self, store: Arc<dyn JobStore>) -> RunningWorker {
        let executor = JobExecutor::new(store, self.handlers.clone(), self.config.clone());
        RunningWorker::spawn(executor)
    }
}
