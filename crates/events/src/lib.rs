//! Event bus mechanics (transport-agnostic).
//!
//! Infrastructure-backed implementations (Redis) live in `grainlify-infra`.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use envelope::BusMessage;
pub use in_memory_bus::InMemoryEventBus;
