use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::time::Instant;
use utoipa::ToSchema;

use crate::db;
use crate::AppState;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub response_time_ms: u128,
    pub timestamp: String,
}

/// Liveness plus a database ping
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();
    let healthy = db::check_connection(&state.db).await.is_ok();
    let (status, code) = if healthy {
        ("up", StatusCode::OK)
    } else {
        ("down", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            response_time_ms: started.elapsed().as_millis(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    )
}
