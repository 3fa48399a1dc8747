use grainlify_core::{BootstrapPhase, EXIT_FAILURE, FailureKind};
use grainlify_infra::jobs::WorkerError;
use grainlify_infra::{ConfigError, ConnError, MigrationError};
use grainlify_observability::LogError;

use crate::server::{ServeError, ShutdownError};

/// Every way the process can fail.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(#[from] LogError),

    #[error(transparent)]
    Connection(#[from] ConnError),

    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error("background worker failed: {0}")]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl BootstrapError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BootstrapError::Config(_) | BootstrapError::Logging(_) => FailureKind::Config,
            BootstrapError::Connection(e) => e.kind(),
            BootstrapError::Migration(e) => e.kind(),
            BootstrapError::Serve(_) => FailureKind::Serve,
            BootstrapError::Worker(e) => e.kind(),
            BootstrapError::Shutdown(_) => FailureKind::Shutdown,
        }
    }

    /// The phase in which this error halts the process.
    pub fn phase(&self) -> BootstrapPhase {
        match self {
            BootstrapError::Config(_) | BootstrapError::Logging(_) => BootstrapPhase::Start,
            BootstrapError::Connection(ConnError::Bus(_)) => BootstrapPhase::BusPhase,
            BootstrapError::Connection(_) => BootstrapPhase::DbPhase,
            BootstrapError::Migration(_) => BootstrapPhase::MigratePhase,
            // The listener is bound right after the worker step, before serving.
            BootstrapError::Serve(ServeError::Bind { .. }) => BootstrapPhase::WorkerPhase,
            BootstrapError::Serve(_) | BootstrapError::Worker(_) => BootstrapPhase::Serving,
            BootstrapError::Shutdown(_) => BootstrapPhase::ShuttingDown,
        }
    }

    pub fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }
}
