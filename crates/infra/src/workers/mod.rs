//! Background workers.

pub mod supervisor;

pub use supervisor::{RunningWorker, WorkerDecision, WorkerSupervisor};
