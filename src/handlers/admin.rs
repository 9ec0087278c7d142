use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::models::OrderView;
use crate::services::refunds::RefundResult;
use crate::{ApiResponse, ApiResult, AppState};

/// Refund a paid order and revoke what it granted
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/refund",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Refund issued", body = RefundResult),
        (status = 400, description = "Order is not paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Refund call failed; order left paid", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn refund_order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<RefundResult> {
    tracing::info!(admin_id = %admin.user_id, order_id = %id, "admin refund requested");
    let result = state.services.refunds.refund_order(id, Utc::now()).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Cancel any pending order
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = OrderView),
        (status = 400, description = "Order is no longer pending", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .cancel(admin.actor(), id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
