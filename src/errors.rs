use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Duplicate purchase: 1 product(s) already owned",
    "details": {"product_ids": ["550e8400-e29b-41d4-a716-446655440000"]},
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Structured detail the client can act on (owned items, missing products)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Duplicate purchase: {} product(s) already owned", .product_ids.len())]
    DuplicatePurchase { product_ids: Vec<Uuid> },

    #[error("Products unavailable: {}", .missing.join(", "))]
    ProductsUnavailable { missing: Vec<String> },

    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),

    #[error("Invalid promo code: {0}")]
    PromoInvalid(String),

    #[error("Promo code expired: {0}")]
    PromoExpired(String),

    #[error("Promo code does not apply: {0}")]
    PromoNotApplicable(String),

    #[error("Minimum order amount not met for promo {code}: requires {min_order_amount}")]
    PromoMinOrderNotMet {
        code: String,
        min_order_amount: rust_decimal::Decimal,
    },

    #[error("Promo code usage limit reached: {0}")]
    PromoLimitExceeded(String),

    #[error("Invalid transition: order is {current}")]
    InvalidTransition { current: OrderStatus },

    #[error("Invalid user state: {0}")]
    InvalidUserState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::DuplicatePurchase { .. }
            | Self::ProductsUnavailable { .. }
            | Self::CurrencyMismatch(_)
            | Self::PromoInvalid(_)
            | Self::PromoExpired(_)
            | Self::PromoNotApplicable(_)
            | Self::PromoMinOrderNotMet { .. }
            | Self::InvalidTransition { .. }
            | Self::InvalidSignature => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::PromoLimitExceeded(_) | Self::InvalidUserState(_) => {
                StatusCode::CONFLICT
            }
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::InternalInvariant(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalInvariant(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::ExternalServiceError(_) => "Payment provider unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// Structured detail for errors the client resolves on its side.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::DuplicatePurchase { product_ids } => Some(json!({ "product_ids": product_ids })),
            Self::ProductsUnavailable { missing } => Some(json!({ "missing": missing })),
            Self::PromoMinOrderNotMet {
                min_order_amount, ..
            } => Some(json!({ "min_order_amount": min_order_amount })),
            Self::InvalidTransition { current } => Some(json!({ "status": current })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
