use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::errors::ServiceError;
use crate::webhooks::SIGNATURE_HEADER;
use crate::AppState;

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook acknowledged"),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let ack = state
        .services
        .reconciliation
        .handle_webhook(&body, signature, Utc::now())
        .await?;
    debug!(result = ack.label(), "webhook handled");

    Ok((
        StatusCode::OK,
        Json(json!({ "status": "ok", "result": ack.label() })),
    ))
}
