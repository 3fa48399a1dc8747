//! Background sync jobs with retry, backoff, and dead-lettering.
//!
//! ## Components
//!
//! - `Job`: kind, JSON payload, status, retry policy
//! - `JobStore`: persistence (`sync_jobs` table, or in-memory for tests)
//! - `JobExecutor`: polling loop that runs jobs through a `HandlerRegistry`

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{
    ExecutorStats, HandlerRegistry, JobExecutor, JobExecutorConfig, JobHandler, StatsHandle, WorkerError,
};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError, PostgresJobStore};
pub use types::{Job, JobStatus};
