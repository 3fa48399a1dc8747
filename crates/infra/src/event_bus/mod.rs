//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `grainlify-events` as pure mechanics. This
//! module provides the Redis-backed implementation and the shared handle.

pub mod redis_pubsub;

use std::sync::Arc;

use grainlify_events::{BusError, BusMessage, EventBus};

pub use redis_pubsub::{DEFAULT_CHANNEL, RedisBusError, RedisEventBus};

/// Shared, cheaply clonable reference to the process's event bus.
#[derive(Debug, Clone)]
pub struct EventBusHandle {
    bus: Arc<dyn EventBus>,
}

impl EventBusHandle {
    pub fn from_bus<B>(bus: B) -> Self
    where
        B: EventBus + 'static,
    {
        Self { bus: Arc::new(bus) }
    }

    pub fn from_arc(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub fn transport(&self) -> &'static str {
        self.bus.transport()
    }

    pub async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        self.bus.publish(message).await
    }

    /// Reserved for the connection manager.
    pub(crate) async fn close(&self) -> Result<(), BusError> {
        self.bus.close().await
    }
}
