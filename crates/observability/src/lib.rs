//! Tracing/logging setup shared by every binary.
//!
//! Nothing here installs a process-wide default subscriber. Callers build a
//! [`::tracing::Dispatch`] once and attach it to the futures they run (see
//! `tracing::instrument::WithSubscriber`), so the logger is an explicit value
//! rather than hidden global state.

pub mod tracing;

pub use self::tracing::{LogError, LogFormat, LogSettings, bootstrap_dispatch, dispatch};
