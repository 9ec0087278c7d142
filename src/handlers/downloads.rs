use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::services::entitlements::{Access, UsageReceipt};
use crate::{ApiResponse, ApiResult, AppState};

/// Check whether the caller may use a product, without consuming quota
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Access decision", body = Access),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Downloads"
)]
pub async fn check_access(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Access> {
    let access = state
        .services
        .entitlements
        .check_access(user.user_id, product_id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(access)))
}

/// Record a download, consuming membership quota when the product is not owned
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Download allowed", body = UsageReceipt),
        (status = 403, description = "No access or quota exhausted", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Downloads"
)]
pub async fn record_download(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<UsageReceipt> {
    let receipt = state
        .services
        .entitlements
        .record_download(user.user_id, product_id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(receipt)))
}

/// Record a remix request against the membership's monthly quota
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{product_id}/remix",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Remix request recorded", body = UsageReceipt),
        (status = 403, description = "No access or quota exhausted", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Downloads"
)]
pub async fn record_remix_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<UsageReceipt> {
    let receipt = state
        .services
        .entitlements
        .record_remix_request(user.user_id, product_id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(receipt)))
}
