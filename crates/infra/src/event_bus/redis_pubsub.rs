//! Redis pub/sub-backed event bus.
//!
//! Note: Redis pub/sub is not durable (messages are dropped when no worker is
//! subscribed). Workers that need durability should poll the `sync_jobs`
//! table instead.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use grainlify_events::{BusError, BusMessage, EventBus};

pub const DEFAULT_CHANNEL: &str = "grainlify:jobs";

#[derive(Debug, thiserror::Error)]
pub enum RedisBusError {
    #[error("invalid redis url: {0}")]
    InvalidUrl(#[source] redis::RedisError),

    #[error("redis connection error: {0}")]
    Connection(#[source] redis::RedisError),

    #[error("unexpected PING reply '{0}'")]
    Ping(String),
}

impl From<RedisBusError> for BusError {
    fn from(err: RedisBusError) -> Self {
        BusError::Transport(err.to_string())
    }
}

/// Redis pub/sub bus for JSON [`BusMessage`]s.
///
/// Holds one multiplexed connection; `close` drops it, after which publishing
/// fails with [`BusError::Closed`].
#[derive(Debug)]
pub struct RedisEventBus {
    channel: String,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisEventBus {
    /// Connect and verify the server answers `PING`.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str, channel: &str) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(url).map_err(RedisBusError::InvalidUrl)?;
        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(RedisBusError::Connection)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(RedisBusError::Connection)?;
        if !pong.eq_ignore_ascii_case("PONG") {
            return Err(RedisBusError::Ping(pong));
        }

        debug!("redis bus connected");
        Ok(Self {
            channel: channel.to_string(),
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    fn transport(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let payload = serde_json::to_string(&message).map_err(|e| BusError::Serialize(e.to_string()))?;

        // Multiplexed connections are cheap to clone; don't hold the lock
        // across the round trip.
        let mut conn = self.conn.lock().await.clone().ok_or(BusError::Closed)?;

        let _receivers: i64 = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.conn.lock().await.take().is_some() {
            debug!(channel = %self.channel, "redis bus closed");
        }
        Ok(())
    }
}
