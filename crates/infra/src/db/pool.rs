//! Postgres connection pool.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("database connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Owned database pool.
///
/// Cloning the inner [`PgPool`] is cheap; only the connection manager closes it.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    pool: PgPool,
}

impl DatabaseHandle {
    /// Open a pool and prove it works with a `SELECT 1`, all within `timeout`.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str, timeout: Duration, max_connections: u32) -> Result<Self, PoolError> {
        let connect = async {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(timeout)
                .connect(url)
                .await?;

            sqlx::query("SELECT 1").execute(&pool).await?;
            Ok::<_, sqlx::Error>(pool)
        };

        let pool = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| PoolError::Timeout(timeout))??;

        debug!("database pool ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close every connection. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_database_is_an_error_within_the_bound() {
        // Port 1 on loopback refuses immediately; no real server is needed.
        let started = std::time::Instant::now();
        let err = DatabaseHandle::connect("postgres://u:p@127.0.0.1:1/db", Duration::from_secs(2), 1)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, PoolError::Timeout(_) | PoolError::Database(_)));
    }

    #[tokio::test]
    async fn lazy_pool_can_be_adopted_and_closed_twice() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://u:p@127.0.0.1:1/db")
            .unwrap();
        let handle = DatabaseHandle::from_pool(pool);

        handle.close().await;
        handle.close().await;
        assert!(handle.is_closed());
    }
}
