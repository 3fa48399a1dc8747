//! Migration runner: load, connect, apply with bounded retry on lock contention.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use grainlify_core::FailureKind;
use sqlx::{Connection, PgConnection, PgPool};
use tracing::instrument::WithSubscriber;
use tracing::{Instrument, error, info, warn};

use crate::retry::RetryPolicy;

use super::classify::default_contention;
use super::driver::{ApplyError, ApplyOutcome, MIGRATIONS_TABLE, MigrationDriver, PostgresDriver};
use super::source::{EmbeddedMigrations, Migration, MigrationSource, SourceError};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(5);

/// Decides whether a failed attempt was lock contention.
pub type ContentionPredicate = Arc<dyn Fn(&ApplyError) -> bool + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration precondition failed: {0}")]
    Config(&'static str),

    #[error("open migration source: {0}")]
    SourceLoad(#[from] SourceError),

    #[error("open migration connection: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("create migration driver: {0}")]
    Driver(#[source] ApplyError),

    #[error("{source}")]
    Failed {
        attempts: u32,
        lock_contention: bool,
        #[source]
        source: ApplyError,
    },

    #[error("migrations did not finish within {budget:?}")]
    TimedOut { budget: Duration },

    #[error("migration task aborted: {0}")]
    Aborted(String),
}

impl MigrationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            MigrationError::Config(_) => FailureKind::Config,
            MigrationError::Connect(_) => FailureKind::Connection,
            MigrationError::Failed {
                lock_contention: true,
                ..
            }
            | MigrationError::TimedOut { .. } => FailureKind::MigrationLock,
            MigrationError::SourceLoad(_)
            | MigrationError::Driver(_)
            | MigrationError::Failed { .. }
            | MigrationError::Aborted(_) => FailureKind::MigrationSchema,
        }
    }
}

/// Applies pending migrations, retrying only on lock contention.
///
/// Defaults: three total attempts with 5s then 10s between them, a 30s
/// session `lock_timeout`, tracking table `schema_migrations`, and the
/// substring contention classifier.
#[derive(Clone)]
pub struct MigrationRunner {
    source: Arc<dyn MigrationSource>,
    retry: RetryPolicy,
    is_contention: ContentionPredicate,
    lock_timeout: Duration,
    table: String,
}

impl core::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("source", &self.source.describe())
            .field("retry", &self.retry)
            .field("lock_timeout", &self.lock_timeout)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl MigrationRunner {
    pub fn new(source: Arc<dyn MigrationSource>) -> Self {
        Self {
            source,
            retry: RetryPolicy::linear(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF_STEP),
            is_contention: Arc::new(default_contention),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            table: MIGRATIONS_TABLE.to_string(),
        }
    }

    /// Runner over the migrations bundled with this crate.
    pub fn embedded() -> Self {
        Self::new(Arc::new(EmbeddedMigrations::bundled()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_contention_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ApplyError) -> bool + Send + Sync + 'static,
    {
        self.is_contention = Arc::new(predicate);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Apply all pending migrations through a dedicated connection derived
    /// from `pool`'s connect options.
    ///
    /// Not cancellation-aware: dropping the future mid-apply can leave the
    /// tracking row dirty. Use [`MigrationRunner::up_within`] for a bounded run.
    pub async fn up(&self, pool: Option<&PgPool>) -> Result<ApplyOutcome, MigrationError> {
        let pool = pool.ok_or(MigrationError::Config("nil pool"))?;

        info!(source = %self.source.describe(), "loading migration files");
        let migrations = self.source.load().inspect_err(|e| {
            error!(error = %e, "failed to load migrations");
        })?;
        info!(count = migrations.len(), "migrations loaded");

        info!("opening database connection for migrations");
        let options = pool.connect_options();
        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(MigrationError::Connect)?;

        let mut driver = PostgresDriver::new(conn, self.table.clone());
        let result = self.run_with(&mut driver, &migrations).await;

        if let Err(e) = driver.close().await {
            warn!(error = %e, "failed to close migration connection");
        }

        result
    }

    /// Run [`MigrationRunner::up`] as its own task and wait at most `budget`.
    ///
    /// On timeout the task is abandoned, never aborted: it keeps running in
    /// the background while the caller fails with [`MigrationError::TimedOut`].
    pub async fn up_within(&self, pool: &PgPool, budget: Duration) -> Result<ApplyOutcome, MigrationError> {
        let runner = self.clone();
        let pool = pool.clone();
        abandon_after(budget, async move { runner.up(Some(&pool)).await }).await
    }

    /// The retry protocol over any driver.
    pub async fn run_with<D>(&self, driver: &mut D, migrations: &[Migration]) -> Result<ApplyOutcome, MigrationError>
    where
        D: MigrationDriver + ?Sized,
    {
        info!(table = %self.table, "creating migration driver");
        driver.prepare().await.map_err(|e| {
            error!(error = %e, "failed to create migration driver");
            MigrationError::Driver(e)
        })?;

        match driver.version().await {
            Ok(Some(state)) => info!(version = state.version, dirty = state.dirty, "current migration version"),
            Ok(None) => info!("no migration version recorded yet"),
            Err(e) => warn!(error = %e, "could not get current migration version"),
        }

        if let Err(e) = driver.set_lock_timeout(self.lock_timeout).await {
            warn!(error = %e, "failed to set lock_timeout, continuing anyway");
        }

        info!("running database migrations");
        let mut attempt: u32 = 1;
        let outcome = loop {
            if attempt > 1 {
                let wait = self.retry.delay_for_attempt(attempt - 1);
                info!(
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    "retrying migration after lock contention"
                );
                tokio::time::sleep(wait).await;
            }

            match driver.up(migrations).await {
                Ok(outcome) => break outcome,
                Err(err) => {
                    let lock_contention = (self.is_contention)(&err);
                    if lock_contention && self.retry.should_retry(attempt) {
                        warn!(attempt, error = %err, "migration lock contention, will retry");
                        attempt += 1;
                        continue;
                    }

                    error!(attempt, lock_contention, error = %err, "migration failed after retries");
                    return Err(MigrationError::Failed {
                        attempts: attempt,
                        lock_contention,
                        source: err,
                    });
                }
            }
        };

        match outcome {
            ApplyOutcome::NoChange => info!("migrations up to date, no changes needed"),
            ApplyOutcome::Applied { count, .. } => match driver.version().await {
                Ok(Some(state)) => info!(new_version = state.version, applied = count, "migrations completed successfully"),
                _ => info!(applied = count, "migrations completed successfully"),
            },
        }

        Ok(outcome)
    }
}

async fn abandon_after<F>(budget: Duration, work: F) -> Result<ApplyOutcome, MigrationError>
where
    F: Future<Output = Result<ApplyOutcome, MigrationError>> + Send + 'static,
{
    let task = tokio::spawn(work.in_current_span().with_current_subscriber());

    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(MigrationError::Aborted(join_err.to_string())),
        Err(_) => {
            // Dropping the JoinHandle detaches the task; it is not cancelled.
            warn!(budget_secs = budget.as_secs(), "migration budget elapsed, abandoning migration task");
            Err(MigrationError::TimedOut { budget })
        }
    }
}
