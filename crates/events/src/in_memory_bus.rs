//! In-memory event bus for tests/dev.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{BusError, EventBus, Subscription};
use crate::envelope::BusMessage;

/// In-memory pub/sub bus.
///
/// - No IO
/// - Best-effort fan-out
/// - `close` drops every subscriber sender, ending their streams
#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    state: Mutex<BusState>,
}

#[derive(Debug, Default)]
struct BusState {
    subscribers: Vec<mpsc::UnboundedSender<BusMessage>>,
    closed: bool,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        // Poisoned or closed: the subscription simply never receives anything.
        if let Ok(mut state) = self.state.lock() {
            if !state.closed {
                state.subscribers.push(tx);
            }
        }

        Subscription::new(rx)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    fn transport(&self) -> &'static str {
        "in_memory"
    }

    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BusError::Transport("lock poisoned".to_string()))?;

        if state.closed {
            return Err(BusError::Closed);
        }

        // Drop any dead subscribers while publishing.
        state.subscribers.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BusError::Transport("lock poisoned".to_string()))?;
        state.closed = true;
        state.subscribers.clear();
        Ok(())
    }
}
