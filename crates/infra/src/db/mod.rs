//! Database adapters: connection pool and schema migrations.

pub mod migrate;
pub mod pool;

pub use migrate::{MigrationError, MigrationRunner};
pub use pool::{DatabaseHandle, PoolError};
