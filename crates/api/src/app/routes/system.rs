use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;
use tracing::warn;

use crate::app::AppState;
use crate::app::errors::json_error;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Reports which dependencies are attached; 503 if the database is attached
/// but not answering.
pub async fn ready(Extension(state): Extension<Arc<AppState>>) -> axum::response::Response {
    let database = match &state.database {
        None => "absent",
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "ok",
            Err(e) => {
                warn!(error = %e, "readiness check: database unavailable");
                return json_error(StatusCode::SERVICE_UNAVAILABLE, "database_unavailable", e.to_string());
            }
        },
    };

    Json(json!({
        "status": "ready",
        "env": state.env,
        "database": database,
        "bus": state.bus.as_ref().map(|b| b.transport()),
    }))
    .into_response()
}
