//! Process bootstrap: from loaded configuration to serving, then shutdown.
//!
//! The sequence is fixed:
//!
//! ```text
//! config → database → migrations → event bus → http app → worker → serve
//!        → wait(signal | server failure | worker exit) → shutdown → close
//! ```
//!
//! Initialization runs on the caller's task. A failure during it releases
//! only what was already opened and never reaches `ShuttingDown`. Once
//! serving, exactly one termination event wins and drives a bounded shutdown.

use std::future::Future;
use std::net::SocketAddr;

use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span, warn};

use grainlify_core::BootstrapPhase;
use grainlify_infra::jobs::JobExecutorConfig;
use grainlify_infra::{
    Config, ConnectionManager, DbRequirement, MigrationRunner, Resource, RunningWorker, WorkerSupervisor,
};

use crate::app::{self, AppState};
use crate::server::{ServerHandle, StartServer, bind_and_serve};

pub mod error;
pub mod termination;

pub use error::BootstrapError;
pub use termination::{SignalKind, TerminationSignal, os_signal};

/// Observable bootstrap progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapStatus {
    pub phase: BootstrapPhase,
    pub database: bool,
    pub bus: bool,
    pub worker: bool,
    pub local_addr: Option<SocketAddr>,
}

impl Default for BootstrapStatus {
    fn default() -> Self {
        Self {
            phase: BootstrapPhase::Start,
            database: false,
            bus: false,
            worker: false,
            local_addr: None,
        }
    }
}

/// Whether to apply migrations at startup, and why not.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MigrationDecision {
    Run,
    SkipDisabled,
    SkipNoDatabase,
}

impl MigrationDecision {
    pub fn decide(auto_migrate: bool, has_db: bool) -> Self {
        if !auto_migrate {
            Self::SkipDisabled
        } else if !has_db {
            Self::SkipNoDatabase
        } else {
            Self::Run
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            MigrationDecision::Run => "auto-migrate enabled",
            MigrationDecision::SkipDisabled => "AUTO_MIGRATE disabled",
            MigrationDecision::SkipNoDatabase => "no database connection",
        }
    }
}

/// How a clean run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// What triggered shutdown (`interrupt`, `terminate`, `worker_finished`, ...).
    pub trigger: &'static str,
    /// Resources closed, in release order.
    pub released: Vec<Resource>,
}

/// Log a fatal error with its kind and phase.
pub fn log_fatal(err: &BootstrapError) {
    error!(
        error = %err,
        error_kind = %err.kind(),
        phase = %err.phase(),
        exit_code = err.exit_code(),
        "fatal error, exiting"
    );
}

pub struct Bootstrap {
    config: Config,
    connections: Option<ConnectionManager>,
    migrator: MigrationRunner,
    supervisor: WorkerSupervisor,
    start_server: StartServer,
    status: watch::Sender<BootstrapStatus>,
}

impl core::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("config", &self.config)
            .field("connections", &self.connections)
            .field("migrator", &self.migrator)
            .field("supervisor", &self.supervisor)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl Bootstrap {
    pub fn new(config: Config) -> Self {
        let (status, _) = watch::channel(BootstrapStatus::default());
        Self {
            config,
            connections: None,
            migrator: MigrationRunner::embedded(),
            supervisor: WorkerSupervisor::new(app::jobs::job_handlers(), JobExecutorConfig::default()),
            start_server: bind_and_serve(),
            status,
        }
    }

    /// Start from a manager that already holds connections.
    ///
    /// An attached database or bus is used as-is and its URL is not dialed.
    /// The manager still releases everything on exit.
    pub fn with_connections(mut self, connections: ConnectionManager) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn with_server(mut self, start_server: StartServer) -> Self {
        self.start_server = start_server;
        self
    }

    pub fn with_migrator(mut self, migrator: MigrationRunner) -> Self {
        self.migrator = migrator;
        self
    }

    pub fn with_supervisor(mut self, supervisor: WorkerSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Watch phase changes and attached resources.
    pub fn subscribe(&self) -> watch::Receiver<BootstrapStatus> {
        self.status.subscribe()
    }

    /// Bring the service up, serve until `signal` (or a server/worker exit),
    /// then shut down.
    pub async fn run<S>(self, signal: S) -> Result<ShutdownReport, BootstrapError>
    where
        S: Future<Output = SignalKind>,
    {
        let span = info_span!("bootstrap", env = %self.config.env);
        self.run_inner(signal).instrument(span).await
    }

    async fn run_inner<S>(mut self, signal: S) -> Result<ShutdownReport, BootstrapError>
    where
        S: Future<Output = SignalKind>,
    {
        let mut connections = self
            .connections
            .take()
            .unwrap_or_else(|| ConnectionManager::new(DbRequirement::for_env(self.config.is_dev())));

        let (mut server, mut worker) = match self.start(&mut connections).await {
            Ok(started) => started,
            Err(err) => {
                log_fatal(&err);
                let released = connections.close_all().await;
                info!(released = released.len(), "released resources opened before the failure");
                return Err(err);
            }
        };

        info!("server is running, waiting for shutdown signal");
        let trigger = termination::race(
            signal,
            server.failed(),
            termination::worker_exit(worker.as_mut()),
        )
        .await;

        self.advance(BootstrapPhase::ShuttingDown);
        let described = trigger.describe();
        info!(trigger = described, "shutting down server");

        let shutdown = server.shutdown(self.config.shutdown_timeout).await;

        if let Some(worker) = worker.take() {
            let stats = worker.stats();
            info!(
                worker = worker.name(),
                processed = stats.jobs_processed,
                failed = stats.jobs_failed,
                dead_lettered = stats.jobs_dead_lettered,
                "stopping background worker"
            );
            worker.stop_and_wait(self.config.shutdown_timeout).await;
        }

        let released = connections.close_all().await;
        self.advance(BootstrapPhase::Stopped);

        let trigger_error = match trigger {
            TerminationSignal::Os(_) | TerminationSignal::WorkerExited(Ok(())) => None,
            TerminationSignal::ServerFailed(e) => Some(BootstrapError::from(e)),
            TerminationSignal::WorkerExited(Err(e)) => Some(BootstrapError::from(e)),
        };

        let result = match (trigger_error, shutdown) {
            (None, Ok(())) => {
                info!(trigger = described, "server exited");
                return Ok(ShutdownReport {
                    trigger: described,
                    released,
                });
            }
            (None, Err(e)) => BootstrapError::from(e),
            (Some(err), Ok(())) => err,
            (Some(err), Err(e)) => {
                warn!(error = %e, "shutdown also failed");
                err
            }
        };

        log_fatal(&result);
        Err(result)
    }

    /// Steps 1 to 7. Returns the running server and worker, if any.
    async fn start(
        &self,
        connections: &mut ConnectionManager,
    ) -> Result<(ServerHandle, Option<RunningWorker>), BootstrapError> {
        let cfg = &self.config;

        info!(
            step = 1,
            action = "load_config",
            env = %cfg.env,
            http_addr = %cfg.http_addr,
            db_url_set = cfg.db_url.is_some(),
            bus_url_set = cfg.bus_url.is_some(),
            auto_migrate = cfg.auto_migrate,
            jwt_secret_set = cfg.jwt_secret.is_some(),
            github_oauth_configured = cfg.github_oauth_client_id.is_some() && cfg.github_oauth_client_secret.is_some(),
            public_base_url_set = cfg.public_base_url.is_some(),
            "configuration loaded"
        );
        self.advance(BootstrapPhase::ConfigLoaded);

        self.advance(BootstrapPhase::DbPhase);
        info!(step = 2, action = "connect_db", "database connection");
        let database = match connections.database() {
            Some(db) => {
                info!("using the already attached database");
                Some(db.clone())
            }
            None => {
                connections
                    .connect_db(cfg.db_url.as_deref(), cfg.db_connect_timeout, cfg.db_max_connections)
                    .await?
            }
        };
        self.status.send_modify(|s| s.database = database.is_some());

        self.advance(BootstrapPhase::MigratePhase);
        let decision = MigrationDecision::decide(cfg.auto_migrate, database.is_some());
        match (decision, database.as_ref()) {
            (MigrationDecision::Run, Some(db)) => {
                info!(
                    step = 3,
                    action = "migrate",
                    budget_secs = cfg.migration_budget.as_secs(),
                    "running database migrations"
                );
                self.migrator.up_within(db.pool(), cfg.migration_budget).await?;
            }
            _ => info!(step = 3, action = "migrate", reason = decision.reason(), "skipping migrations"),
        }

        self.advance(BootstrapPhase::BusPhase);
        info!(step = 4, action = "connect_bus", "event bus connection");
        let bus = match connections.bus() {
            Some(bus) => {
                info!(transport = bus.transport(), "using the already attached event bus");
                Some(bus.clone())
            }
            None => connections.connect_bus(cfg.bus_url.as_deref()).await?,
        };
        self.status.send_modify(|s| s.bus = bus.is_some());

        self.advance(BootstrapPhase::AppInit);
        info!(step = 5, action = "build_app", "creating http application");
        let router = app::build_app(AppState {
            env: cfg.env.clone(),
            database: database.as_ref().map(|db| db.pool().clone()),
            bus: bus.clone(),
        });

        self.advance(BootstrapPhase::WorkerPhase);
        info!(step = 6, action = "start_worker", "background worker");
        let worker = self.supervisor.maybe_start(bus.is_some(), database.as_ref());
        self.status.send_modify(|s| s.worker = worker.is_some());

        info!(step = 7, action = "serve", addr = %cfg.http_addr, "starting http server");
        let server = match (self.start_server)(cfg.http_addr.clone(), router).await {
            Ok(server) => server,
            Err(err) => {
                if let Some(worker) = worker {
                    worker.stop_and_wait(cfg.shutdown_timeout).await;
                }
                return Err(err.into());
            }
        };

        let local_addr = server.local_addr();
        self.status.send_modify(|s| s.local_addr = Some(local_addr));
        self.advance(BootstrapPhase::Serving);

        Ok((server, worker))
    }

    fn advance(&self, to: BootstrapPhase) {
        self.status.send_modify(|status| match status.phase.advance(to) {
            Ok(next) => {
                status.phase = next;
                info!(phase = %next, "bootstrap phase");
            }
            Err(e) => warn!(error = %e, "ignoring phase transition"),
        });
    }
}
