//! HTTP application wiring (Axum router + state).
//!
//! - `routes/`: HTTP handlers (operational endpoints only)
//! - `errors.rs`: consistent JSON error responses
//! - `jobs.rs`: handlers for the in-process sync worker

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use sqlx::PgPool;
use tower::ServiceBuilder;

use grainlify_infra::EventBusHandle;

pub mod errors;
pub mod jobs;
pub mod routes;

/// Dependencies handed to request handlers. Handles are shared clones; the
/// connection manager keeps ownership.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub env: String,
    pub database: Option<PgPool>,
    pub bus: Option<EventBusHandle>,
}

/// Build the HTTP router.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/ready", get(routes::system::ready))
        .layer(ServiceBuilder::new().layer(Extension(Arc::new(state))))
}
