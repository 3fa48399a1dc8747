//! Ownership of the process's external connections.
//!
//! The manager is the single owner of the database pool and the bus
//! connection. Everything else receives cheap clones of the handles and never
//! closes them. `close_all` releases in reverse acquisition order.

use std::time::Duration;

use grainlify_core::FailureKind;
use grainlify_events::BusError;
use tracing::{info, warn};

use crate::db::{DatabaseHandle, PoolError};
use crate::event_bus::{DEFAULT_CHANNEL, EventBusHandle, RedisBusError, RedisEventBus};

/// Whether a missing database URL is tolerated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DbRequirement {
    Optional,
    Required,
}

impl DbRequirement {
    /// Only the development environment may run without a database.
    pub fn for_env(is_dev: bool) -> Self {
        if is_dev { Self::Optional } else { Self::Required }
    }
}

/// A resource the manager has acquired.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Resource {
    Database,
    Bus,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Database => "database",
            Resource::Bus => "bus",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("DB_URL is required outside the dev environment")]
    MissingDatabaseUrl,

    #[error("{target} connect timed out after {after:?}")]
    Timeout { target: &'static str, after: Duration },

    #[error("database connect failed: {0}")]
    Database(#[source] sqlx::Error),

    #[error("bus connect failed: {0}")]
    Bus(#[source] RedisBusError),
}

impl ConnError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ConnError::MissingDatabaseUrl => FailureKind::Config,
            ConnError::Timeout { .. } | ConnError::Database(_) | ConnError::Bus(_) => FailureKind::Connection,
        }
    }
}

impl From<PoolError> for ConnError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(after) => ConnError::Timeout {
                target: "database",
                after,
            },
            PoolError::Database(e) => ConnError::Database(e),
        }
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    requirement: DbRequirement,
    database: Option<DatabaseHandle>,
    bus: Option<EventBusHandle>,
    acquired: Vec<Resource>,
}

impl ConnectionManager {
    pub fn new(requirement: DbRequirement) -> Self {
        Self {
            requirement,
            database: None,
            bus: None,
            acquired: Vec::new(),
        }
    }

    /// Connect the database pool, or skip when no URL is configured.
    ///
    /// Skipping is only allowed under [`DbRequirement::Optional`].
    pub async fn connect_db(
        &mut self,
        url: Option<&str>,
        timeout: Duration,
        max_connections: u32,
    ) -> Result<Option<DatabaseHandle>, ConnError> {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return match self.requirement {
                DbRequirement::Optional => {
                    warn!("DB_URL not set; running without a database (dev only)");
                    Ok(None)
                }
                DbRequirement::Required => Err(ConnError::MissingDatabaseUrl),
            };
        };

        info!(timeout_secs = timeout.as_secs(), "connecting to database");
        let handle = DatabaseHandle::connect(url, timeout, max_connections).await?;
        info!("database connected");

        Ok(Some(self.adopt_database(handle)))
    }

    /// Connect the event bus, or skip when no URL is configured.
    pub async fn connect_bus(&mut self, url: Option<&str>) -> Result<Option<EventBusHandle>, ConnError> {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            info!("BUS_URL not set; no event bus");
            return Ok(None);
        };

        info!("connecting to event bus");
        let bus = RedisEventBus::connect(url, DEFAULT_CHANNEL)
            .await
            .map_err(ConnError::Bus)?;
        info!(channel = %bus.channel(), "event bus connected");

        Ok(Some(self.adopt_bus(EventBusHandle::from_bus(bus))))
    }

    /// Take ownership of an already-open database handle.
    pub fn adopt_database(&mut self, handle: DatabaseHandle) -> DatabaseHandle {
        self.database = Some(handle.clone());
        self.acquired.push(Resource::Database);
        handle
    }

    /// Take ownership of an already-open bus.
    pub fn adopt_bus(&mut self, handle: EventBusHandle) -> EventBusHandle {
        self.bus = Some(handle.clone());
        self.acquired.push(Resource::Bus);
        handle
    }

    pub fn database(&self) -> Option<&DatabaseHandle> {
        self.database.as_ref()
    }

    pub fn bus(&self) -> Option<&EventBusHandle> {
        self.bus.as_ref()
    }

    /// Release everything acquired so far, newest first.
    ///
    /// Close errors are logged, not returned. A second call releases nothing.
    /// Returns the resources released, in release order.
    pub async fn close_all(&mut self) -> Vec<Resource> {
        let mut released = Vec::with_capacity(self.acquired.len());

        while let Some(resource) = self.acquired.pop() {
            match resource {
                Resource::Database => {
                    if let Some(db) = self.database.take() {
                        db.close().await;
                        info!(resource = resource.as_str(), "closed");
                    }
                }
                Resource::Bus => {
                    if let Some(bus) = self.bus.take() {
                        match bus.close().await {
                            Ok(()) => info!(resource = resource.as_str(), "closed"),
                            Err(e) => log_close_error(resource, &e),
                        }
                    }
                }
            }
            released.push(resource);
        }

        released
    }
}

fn log_close_error(resource: Resource, err: &BusError) {
    warn!(resource = resource.as_str(), error = %err, "failed to close");
}
