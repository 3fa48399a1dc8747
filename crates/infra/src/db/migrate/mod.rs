//! Schema migrations.
//!
//! ## Components
//!
//! - `MigrationSource`: ordered scripts (embedded or from a directory)
//! - `MigrationDriver`: tracking table, advisory lock, script execution
//! - `MigrationRunner`: the retry protocol around a driver
//! - `classify`: lock-contention predicates used to decide on retries

pub mod classify;
pub mod driver;
pub mod runner;
pub mod source;

pub use classify::{default_contention, is_lock_contention_text, sqlstate_contention};
pub use driver::{
    ApplyError, ApplyOutcome, ApplyPlan, MIGRATIONS_TABLE, MigrationDriver, MigrationState, PostgresDriver, Step, plan,
};
pub use runner::{ContentionPredicate, MigrationError, MigrationRunner};
pub use source::{DirectoryMigrations, EmbeddedMigrations, Migration, MigrationSource, SourceError};
