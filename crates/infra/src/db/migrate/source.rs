//! Where migration scripts come from.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A single forward migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: Cow<'static, str>,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>, sql: impl Into<Cow<'static, str>>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read migrations from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid migration file name '{0}' (expected {{version}}_{{name}}.up.sql)")]
    InvalidName(String),

    #[error("duplicate migration version {0}")]
    Duplicate(i64),
}

/// Ordered supply of migrations.
///
/// Implementations return migrations sorted by ascending version with no
/// duplicates.
pub trait MigrationSource: Send + Sync + core::fmt::Debug {
    /// Short description for logs (`embedded`, a directory path, ...).
    fn describe(&self) -> String;

    fn load(&self) -> Result<Vec<Migration>, SourceError>;
}

/// Migrations compiled into the binary.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedMigrations {
    migrations: Vec<Migration>,
}

impl EmbeddedMigrations {
    /// The service's own schema.
    pub fn bundled() -> Self {
        Self {
            migrations: vec![Migration::new(
                1,
                "sync_jobs",
                include_str!("../../../migrations/000001_sync_jobs.up.sql"),
            )],
        }
    }

    pub fn from_migrations(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }
}

impl MigrationSource for EmbeddedMigrations {
    fn describe(&self) -> String {
        "embedded".to_string()
    }

    fn load(&self) -> Result<Vec<Migration>, SourceError> {
        sorted_unique(self.migrations.clone())
    }
}

/// Migrations read from a directory of `{version}_{name}.up.sql` files.
///
/// `.down.sql` files and anything else without the `.up.sql` suffix are
/// ignored.
#[derive(Debug, Clone)]
pub struct DirectoryMigrations {
    dir: PathBuf,
}

impl DirectoryMigrations {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MigrationSource for DirectoryMigrations {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn load(&self) -> Result<Vec<Migration>, SourceError> {
        let io_err = |source| SourceError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut migrations = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".up.sql") else {
                continue;
            };

            let (version, name) = parse_stem(stem).ok_or_else(|| SourceError::InvalidName(file_name.to_string()))?;
            let sql = std::fs::read_to_string(&path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;

            migrations.push(Migration::new(version, name, sql));
        }

        sorted_unique(migrations)
    }
}

fn parse_stem(stem: &str) -> Option<(i64, &str)> {
    let (version, name) = stem.split_once('_')?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version = version.parse::<i64>().ok()?;
    Some((version, name))
}

fn sorted_unique(migrations: Vec<Migration>) -> Result<Vec<Migration>, SourceError> {
    let mut by_version = BTreeMap::new();
    for m in migrations {
        let version = m.version;
        if by_version.insert(version, m).is_some() {
            return Err(SourceError::Duplicate(version));
        }
    }
    Ok(by_version.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_migrations_create_the_job_table() {
        let migrations = EmbeddedMigrations::bundled().load().unwrap();
        assert_eq!(migrations[0].version, 1);
        assert!(migrations[0].sql.contains("sync_jobs"));
    }

    #[test]
    fn embedded_source_sorts_and_rejects_duplicates() {
        let source = EmbeddedMigrations::from_migrations(vec![
            Migration::new(3, "c", "SELECT 3"),
            Migration::new(1, "a", "SELECT 1"),
        ]);
        let versions: Vec<_> = source.load().unwrap().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 3]);

        let dup = EmbeddedMigrations::from_migrations(vec![
            Migration::new(2, "a", "SELECT 1"),
            Migration::new(2, "b", "SELECT 2"),
        ]);
        assert!(matches!(dup.load(), Err(SourceError::Duplicate(2))));
    }

    #[test]
    fn directory_source_reads_up_scripts_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000002_add_index.up.sql"), "CREATE INDEX i ON t (c);").unwrap();
        std::fs::write(dir.path().join("000001_init.up.sql"), "CREATE TABLE t (c INT);").unwrap();
        std::fs::write(dir.path().join("000001_init.down.sql"), "DROP TABLE t;").unwrap();
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();

        let migrations = DirectoryMigrations::new(dir.path()).load().unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[0].name, "init");
        assert_eq!(migrations[1].name, "add_index");
    }

    #[test]
    fn directory_source_rejects_malformed_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("init.up.sql"), "SELECT 1;").unwrap();

        let err = DirectoryMigrations::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, SourceError::InvalidName(name) if name == "init.up.sql"));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let err = DirectoryMigrations::new("/definitely/not/here").load().unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }
}
