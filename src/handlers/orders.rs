use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::models::OrderView;
use crate::services::checkout::{CheckoutResult, MembershipOrderInput, ProductOrderInput};
use crate::services::reconciliation::ClientConfirmation;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateProductOrderRequest {
    /// Product ids or slugs
    #[validate(length(min = 1, message = "at least one product is required"))]
    pub product_ids: Vec<String>,
    #[validate(length(equal = 3, message = "currency must be an ISO 4217 code"))]
    pub currency: String,
    pub promo_code: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateMembershipOrderRequest {
    #[validate(length(min = 1, max = 64))]
    pub plan_key: String,
    /// Clamped to the configured maximum; values below one count as one
    #[serde(default = "default_months")]
    pub months: i64,
    #[validate(length(equal = 3, message = "currency must be an ISO 4217 code"))]
    pub currency: String,
}

fn default_months() -> i64 {
    1
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1))]
    pub remote_order_id: String,
    #[validate(length(min = 1))]
    pub payment_id: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

/// Create a pending order for a cart of products
#[utoipa::path(
    post,
    path = "/api/v1/orders/products",
    request_body = CreateProductOrderRequest,
    responses(
        (status = 201, description = "Order created", body = CheckoutResult),
        (status = 400, description = "Invalid cart, promo or duplicate purchase", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_product_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateProductOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResult>>), ServiceError> {
    payload.validate()?;
    let result = state
        .services
        .checkout
        .create_product_order(
            user.user_id,
            ProductOrderInput {
                product_refs: payload.product_ids,
                currency: payload.currency,
                promo_code: payload.promo_code,
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(result))))
}

/// Create a pending membership order
#[utoipa::path(
    post,
    path = "/api/v1/orders/membership",
    request_body = CreateMembershipOrderRequest,
    responses(
        (status = 201, description = "Order created", body = CheckoutResult),
        (status = 404, description = "Plan not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_membership_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateMembershipOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResult>>), ServiceError> {
    payload.validate()?;
    let result = state
        .services
        .checkout
        .create_membership_order(
            user.user_id,
            MembershipOrderInput {
                plan_key: payload.plan_key,
                months: payload.months,
                currency: payload.currency,
            },
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(result))))
}

/// Get an order (owner or admin)
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = OrderView),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state.services.orders.get(user.actor(), id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Confirm a completed checkout from the client
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/verify",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Order paid", body = OrderView),
        (status = 400, description = "Signature or order mismatch", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the order owner", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> ApiResult<OrderView> {
    payload.validate()?;
    let order = state
        .services
        .reconciliation
        .confirm_payment_from_client(
            user.user_id,
            id,
            ClientConfirmation {
                remote_order_id: payload.remote_order_id,
                payment_id: payload.payment_id,
                signature: payload.signature,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel a pending order the caller owns
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = OrderView),
        (status = 400, description = "Order is no longer pending", body = crate::errors::ErrorResponse),
        (status = 409, description = "A payment is attached", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .cancel(user.actor(), id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
