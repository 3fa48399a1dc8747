//! Infrastructure layer: configuration, database, event bus, background jobs.
//!
//! Everything that touches the network or the filesystem lives here; the
//! bootstrap sequencing that drives it lives in `grainlify-api`.

pub mod config;
pub mod connections;
pub mod db;
pub mod event_bus;
pub mod jobs;
pub mod retry;
pub mod workers;

pub use config::{Config, ConfigError};
pub use connections::{ConnError, ConnectionManager, DbRequirement, Resource};
pub use db::{DatabaseHandle, MigrationError, MigrationRunner};
pub use event_bus::EventBusHandle;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use workers::{RunningWorker, WorkerDecision, WorkerSupervisor};
