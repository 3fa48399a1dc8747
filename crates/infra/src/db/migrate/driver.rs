//! Migration drivers: the part that actually talks to the database.
//!
//! ## Tracking table
//!
//! ```sql
//! CREATE TABLE schema_migrations (version BIGINT PRIMARY KEY, dirty BOOLEAN NOT NULL);
//! ```
//!
//! The table holds at most one row. A version is written with `dirty = true`
//! before its script runs and rewritten with `dirty = false` after it
//! succeeds, so a crash mid-script leaves the row dirty and later runs refuse
//! to continue until an operator fixes the schema.
//!
//! ## Concurrency
//!
//! Concurrent migrators are serialized by a session-level advisory lock keyed
//! on database, schema and tracking table. The wait is bounded by the
//! session's `lock_timeout`; running out of it surfaces as
//! [`ApplyError::Locked`].

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use tracing::{debug, info, warn};

use super::source::Migration;

pub const MIGRATIONS_TABLE: &str = "schema_migrations";

/// Applied version and dirty flag as recorded in the tracking table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationState {
    pub version: i64,
    pub dirty: bool,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Nothing was pending.
    NoChange,
    Applied {
        from: Option<i64>,
        to: i64,
        count: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("can't acquire lock: {0}")]
    Locked(#[source] sqlx::Error),

    #[error("Dirty database version {0}. Fix and force version.")]
    Dirty(i64),

    #[error("migration {version} failed: {source}")]
    Script {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl ApplyError {
    /// Postgres SQLSTATE of the underlying database error, if any.
    pub fn sqlstate(&self) -> Option<String> {
        let err = match self {
            ApplyError::Database(e) | ApplyError::Locked(e) | ApplyError::Script { source: e, .. } => e,
            ApplyError::Dirty(_) | ApplyError::Other(_) => return None,
        };

        match err {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
            _ => None,
        }
    }
}

/// Database side of a migration run.
///
/// One driver owns one dedicated connection for the duration of the run.
#[async_trait]
pub trait MigrationDriver: Send {
    /// Create the tracking table if needed.
    async fn prepare(&mut self) -> Result<(), ApplyError>;

    /// Current state, or `None` when nothing has been applied yet.
    async fn version(&mut self) -> Result<Option<MigrationState>, ApplyError>;

    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<(), ApplyError>;

    /// Apply every migration newer than the recorded version, in order.
    async fn up(&mut self, migrations: &[Migration]) -> Result<ApplyOutcome, ApplyError>;
}

/// Postgres driver over a dedicated (non-pooled) connection.
#[derive(Debug)]
pub struct PostgresDriver {
    conn: PgConnection,
    table: String,
}

impl PostgresDriver {
    pub fn new(conn: PgConnection, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
        }
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }

    async fn lock(&mut self) -> Result<(), ApplyError> {
        sqlx::query(
            "SELECT pg_advisory_lock(hashtext(current_database() || '.' || current_schema() || '.' || $1))",
        )
        .bind(&self.table)
        .execute(&mut self.conn)
        .await
        .map_err(ApplyError::Locked)?;
        Ok(())
    }

    async fn unlock(&mut self) -> Result<(), ApplyError> {
        sqlx::query(
            "SELECT pg_advisory_unlock(hashtext(current_database() || '.' || current_schema() || '.' || $1))",
        )
        .bind(&self.table)
        .execute(&mut self.conn)
        .await?;
        Ok(())
    }

    async fn set_version(&mut self, version: i64, dirty: bool) -> Result<(), ApplyError> {
        let mut tx = self.conn.begin().await?;

        sqlx::query(&format!("TRUNCATE \"{}\"", self.table))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("INSERT INTO \"{}\" (version, dirty) VALUES ($1, $2)", self.table))
            .bind(version)
            .bind(dirty)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn apply_locked(&mut self, migrations: &[Migration]) -> Result<ApplyOutcome, ApplyError> {
        // The table may have been created by another instance while we waited.
        self.prepare().await?;

        let current = self.version().await?;
        let plan = plan(migrations, current)?;

        for step in plan.steps() {
            match step {
                Step::MarkDirty(version) => self.set_version(version, true).await?,
                Step::Run(migration) => {
                    info!(version = migration.version, name = %migration.name, "applying migration");
                    let sql: &str = &migration.sql;
                    sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql))
                        .await
                        .map_err(|source| ApplyError::Script {
                            version: migration.version,
                            source,
                        })?;
                }
                Step::MarkClean(version) => self.set_version(version, false).await?,
            }
        }

        Ok(plan.outcome())
    }
}

/// Migrations still to apply on top of the recorded state.
#[derive(Debug)]
pub struct ApplyPlan<'a> {
    from: Option<i64>,
    pending: Vec<&'a Migration>,
}

/// One unit of work while applying a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<'a> {
    MarkDirty(i64),
    Run(&'a Migration),
    MarkClean(i64),
}

/// Decide what to apply given the recorded state.
///
/// A dirty row refuses everything. Otherwise every migration newer than the
/// recorded version is pending, in ascending order. Versions at or below the
/// recorded one are never re-run, even if they were never applied.
pub fn plan(migrations: &[Migration], current: Option<MigrationState>) -> Result<ApplyPlan<'_>, ApplyError> {
    if let Some(state) = current {
        if state.dirty {
            return Err(ApplyError::Dirty(state.version));
        }
    }

    let from = current.map(|s| s.version);
    let mut pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| from.is_none_or(|v| m.version > v))
        .collect();
    pending.sort_by_key(|m| m.version);

    Ok(ApplyPlan { from, pending })
}

impl<'a> ApplyPlan<'a> {
    pub fn pending(&self) -> &[&'a Migration] {
        &self.pending
    }

    /// Each version is marked dirty, run, then marked clean.
    pub fn steps(&self) -> Vec<Step<'a>> {
        self.pending
            .iter()
            .flat_map(|m| [Step::MarkDirty(m.version), Step::Run(m), Step::MarkClean(m.version)])
            .collect()
    }

    pub fn outcome(&self) -> ApplyOutcome {
        match self.pending.last() {
            None => ApplyOutcome::NoChange,
            Some(last) => ApplyOutcome::Applied {
                from: self.from,
                to: last.version,
                count: self.pending.len(),
            },
        }
    }
}

#[async_trait]
impl MigrationDriver for PostgresDriver {
    async fn prepare(&mut self) -> Result<(), ApplyError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (version BIGINT NOT NULL PRIMARY KEY, dirty BOOLEAN NOT NULL)",
            self.table
        ))
        .execute(&mut self.conn)
        .await?;
        Ok(())
    }

    async fn version(&mut self) -> Result<Option<MigrationState>, ApplyError> {
        let row: Option<(i64, bool)> = sqlx::query_as(&format!("SELECT version, dirty FROM \"{}\" LIMIT 1", self.table))
            .fetch_optional(&mut self.conn)
            .await?;

        Ok(row.map(|(version, dirty)| MigrationState { version, dirty }))
    }

    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<(), ApplyError> {
        // SET does not accept bind parameters.
        sqlx::query(&format!("SET lock_timeout = '{}s'", timeout.as_secs()))
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn up(&mut self, migrations: &[Migration]) -> Result<ApplyOutcome, ApplyError> {
        self.lock().await?;
        debug!(table = %self.table, "migration lock acquired");

        let result = self.apply_locked(migrations).await;

        if let Err(e) = self.unlock().await {
            warn!(error = %e, "failed to release migration lock");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migration(version: i64) -> Migration {
        Migration::new(version, format!("step_{version}"), "SELECT 1")
    }

    fn clean(version: i64) -> Option<MigrationState> {
        Some(MigrationState { version, dirty: false })
    }

    fn versions(plan: &ApplyPlan<'_>) -> Vec<i64> {
        plan.pending().iter().map(|m| m.version).collect()
    }

    #[test]
    fn fresh_database_applies_everything_in_order() {
        let migrations = [migration(1), migration(2), migration(3)];
        let plan = plan(&migrations, None).unwrap();

        assert_eq!(versions(&plan), vec![1, 2, 3]);
        assert_eq!(
            plan.outcome(),
            ApplyOutcome::Applied {
                from: None,
                to: 3,
                count: 3
            }
        );
    }

    #[test]
    fn up_to_date_database_is_no_change() {
        let migrations = [migration(1), migration(2)];
        let plan = plan(&migrations, clean(2)).unwrap();

        assert!(plan.pending().is_empty());
        assert!(plan.steps().is_empty());
        assert_eq!(plan.outcome(), ApplyOutcome::NoChange);
    }

    #[test]
    fn only_versions_above_the_recorded_one_are_pending() {
        // Gap at 3, and the source lists 10 before 5.
        let migrations = [migration(1), migration(2), migration(4), migration(10), migration(5)];
        let plan = plan(&migrations, clean(2)).unwrap();

        assert_eq!(versions(&plan), vec![4, 5, 10]);
        assert_eq!(
            plan.outcome(),
            ApplyOutcome::Applied {
                from: Some(2),
                to: 10,
                count: 3
            }
        );
    }

    #[test]
    fn recorded_version_beyond_the_source_is_no_change() {
        let migrations = [migration(1), migration(2)];
        let plan = plan(&migrations, clean(7)).unwrap();
        assert_eq!(plan.outcome(), ApplyOutcome::NoChange);
    }

    #[test]
    fn dirty_row_refuses_to_plan() {
        let migrations = [migration(1), migration(2)];
        let err = plan(&migrations, Some(MigrationState { version: 1, dirty: true })).unwrap_err();
        assert!(matches!(err, ApplyError::Dirty(1)));
    }

    #[test]
    fn each_version_is_marked_dirty_before_and_clean_after_its_script() {
        let migrations = [migration(1), migration(2)];
        let plan = plan(&migrations, None).unwrap();

        assert_eq!(
            plan.steps(),
            vec![
                Step::MarkDirty(1),
                Step::Run(&migrations[0]),
                Step::MarkClean(1),
                Step::MarkDirty(2),
                Step::Run(&migrations[1]),
                Step::MarkClean(2),
            ]
        );
    }

    #[test]
    fn dirty_error_names_the_version() {
        assert_eq!(
            ApplyError::Dirty(7).to_string(),
            "Dirty database version 7. Fix and force version."
        );
    }

    #[test]
    fn locked_error_reads_as_contention() {
        let err = ApplyError::Locked(sqlx::Error::PoolTimedOut);
        assert!(err.to_string().starts_with("can't acquire lock"));
        assert_eq!(err.sqlstate(), None);
    }

    #[test]
    fn non_database_errors_have_no_sqlstate() {
        assert_eq!(ApplyError::Other("boom".into()).sqlstate(), None);
        assert_eq!(ApplyError::Dirty(1).sqlstate(), None);
    }
}
