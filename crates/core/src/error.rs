//! Failure taxonomy for the bootstrap path.

use serde::{Deserialize, Serialize};

/// Process exit code after a clean shutdown.
pub const EXIT_SUCCESS: i32 = 0;

/// Process exit code for every fatal condition (init, serving, shutdown).
pub const EXIT_FAILURE: i32 = 1;

/// Concrete kind of a fatal failure.
///
/// Every error that can halt the process maps to exactly one kind. The kind is
/// what gets logged as `error_kind` next to the error value, so operators can
/// filter on it without parsing messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A required value is missing or malformed for the current environment.
    Config,

    /// The database or the event bus is unreachable or misconfigured.
    Connection,

    /// A migration kept failing on lock contention until retries ran out.
    MigrationLock,

    /// Any other migration failure (bad script, dirty state, source load).
    MigrationSchema,

    /// The listener could not bind or the serving loop failed.
    Serve,

    /// The in-process background worker stopped with an error.
    Worker,

    /// Graceful shutdown failed or exceeded its bound.
    Shutdown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Config => "config_error",
            FailureKind::Connection => "connection_error",
            FailureKind::MigrationLock => "migration_lock_error",
            FailureKind::MigrationSchema => "migration_schema_error",
            FailureKind::Serve => "serve_error",
            FailureKind::Worker => "worker_error",
            FailureKind::Shutdown => "shutdown_error",
        }
    }

    /// Only lock contention is ever retried, and only inside the migration runner.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::MigrationLock)
    }

    pub fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
