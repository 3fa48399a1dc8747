//! `grainlify-core`: bootstrap primitives shared by every other crate.
//!
//! This crate holds **pure** types only (no IO, no async): the bootstrap phase
//! state machine, the failure taxonomy, and strongly-typed identifiers.

pub mod error;
pub mod id;
pub mod phase;

pub use error::{EXIT_FAILURE, EXIT_SUCCESS, FailureKind};
pub use id::{IdError, JobId};
pub use phase::{BootstrapPhase, PhaseTransitionError};
