//! Publish/subscribe abstraction (mechanics only).
//!
//! The bus distributes job messages to worker processes. When a bus is
//! configured, the API process only publishes; an external worker consumes.
//!
//! ## Delivery Guarantees
//!
//! At-most-once for pub/sub transports (Redis pub/sub drops messages when no
//! subscriber is connected). Consumers must tolerate both loss and duplicates.
//!
//! ## Lifecycle
//!
//! A bus handle is owned by exactly one place (the connection manager) which
//! is the only caller of [`EventBus::close`]. Everyone else only publishes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::envelope::BusMessage;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// A subscription to a bus.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics). `recv` returns `None` once the bus closes.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<BusMessage>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }
}

/// Transport-agnostic event bus.
#[async_trait]
pub trait EventBus: Send + Sync + core::fmt::Debug {
    /// Short transport name for logs (`redis`, `in_memory`).
    fn transport(&self) -> &'static str;

    async fn publish(&self, message: BusMessage) -> Result<(), BusError>;

    /// Release the underlying connection. Publishing afterwards fails with
    /// [`BusError::Closed`]; closing twice is a no-op.
    async fn close(&self) -> Result<(), BusError>;
}

#[async_trait]
impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    fn transport(&self) -> &'static str {
        (**self).transport()
    }

    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        (**self).publish(message).await
    }

    async fn close(&self) -> Result<(), BusError> {
        (**self).close().await
    }
}
