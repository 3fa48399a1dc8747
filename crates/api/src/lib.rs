//! HTTP API process: router, server lifecycle, and the bootstrap sequence.

pub mod app;
pub mod bootstrap;
pub mod server;
