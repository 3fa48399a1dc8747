//! Bootstrap phase state machine.
//!
//! The bootstrap is strictly linear:
//!
//! ```text
//! Start → ConfigLoaded → DbPhase → MigratePhase → BusPhase → AppInit
//!       → WorkerPhase → Serving → ShuttingDown → Stopped
//! ```
//!
//! A phase may be entered and left without doing any work (e.g. `MigratePhase`
//! when auto-migrate is off), but there are no backward transitions and no
//! phase is ever entered twice.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    Start,
    ConfigLoaded,
    DbPhase,
    MigratePhase,
    BusPhase,
    AppInit,
    WorkerPhase,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Attempted to move the state machine backwards or sideways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal bootstrap transition: {from} -> {to}")]
pub struct PhaseTransitionError {
    pub from: BootstrapPhase,
    pub to: BootstrapPhase,
}

impl BootstrapPhase {
    pub const ALL: [BootstrapPhase; 10] = [
        BootstrapPhase::Start,
        BootstrapPhase::ConfigLoaded,
        BootstrapPhase::DbPhase,
        BootstrapPhase::MigratePhase,
        BootstrapPhase::BusPhase,
        BootstrapPhase::AppInit,
        BootstrapPhase::WorkerPhase,
        BootstrapPhase::Serving,
        BootstrapPhase::ShuttingDown,
        BootstrapPhase::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapPhase::Start => "start",
            BootstrapPhase::ConfigLoaded => "config_loaded",
            BootstrapPhase::DbPhase => "db",
            BootstrapPhase::MigratePhase => "migrate",
            BootstrapPhase::BusPhase => "bus",
            BootstrapPhase::AppInit => "app_init",
            BootstrapPhase::WorkerPhase => "worker",
            BootstrapPhase::Serving => "serving",
            BootstrapPhase::ShuttingDown => "shutting_down",
            BootstrapPhase::Stopped => "stopped",
        }
    }

    /// The phase that follows this one, if any.
    pub fn next(&self) -> Option<BootstrapPhase> {
        let idx = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Forward-only: any later phase is reachable (skips are allowed).
    pub fn can_advance_to(&self, to: BootstrapPhase) -> bool {
        to > *self
    }

    /// Validate a transition.
    pub fn advance(self, to: BootstrapPhase) -> Result<BootstrapPhase, PhaseTransitionError> {
        if self.can_advance_to(to) {
            Ok(to)
        } else {
            Err(PhaseTransitionError { from: self, to })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapPhase::Stopped)
    }
}

impl core::fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
