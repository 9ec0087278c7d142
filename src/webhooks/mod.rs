//! Inbound payment gateway notifications.

pub mod signature;

use serde::Deserialize;
use serde_json::Value;

use crate::errors::ServiceError;

/// Header carrying the hex HMAC of the raw body.
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    /// Captured amount in minor units
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundEntity {
    pub id: String,
    pub payment_id: String,
    #[serde(default)]
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
struct Entity<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct EnvelopePayload {
    payment: Option<Entity<PaymentEntity>>,
    refund: Option<Entity<RefundEntity>>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    payload: EnvelopePayload,
}

/// A verified gateway notification, reduced to what the order lifecycle needs.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    PaymentCaptured(PaymentEntity),
    PaymentFailed(PaymentEntity),
    RefundProcessed(RefundEntity),
    Other(String),
}

impl GatewayEvent {
    /// Parses a raw webhook body. Unknown event names are kept as `Other`.
    pub fn parse(raw_body: &[u8]) -> Result<(Self, Value), ServiceError> {
        let raw: Value = serde_json::from_slice(raw_body)
            .map_err(|e| ServiceError::ValidationError(format!("invalid webhook json: {}", e)))?;
        let envelope: Envelope = serde_json::from_value(raw.clone())
            .map_err(|e| ServiceError::ValidationError(format!("invalid webhook payload: {}", e)))?;

        let missing = |what: &str| {
            ServiceError::ValidationError(format!("{} event without {} entity", envelope.event, what))
        };

        let event = match envelope.event.as_str() {
            "payment.captured" => GatewayEvent::PaymentCaptured(
                envelope.payload.payment.ok_or_else(|| missing("payment"))?.entity,
            ),
            "payment.failed" => GatewayEvent::PaymentFailed(
                envelope.payload.payment.ok_or_else(|| missing("payment"))?.entity,
            ),
            "refund.processed" => GatewayEvent::RefundProcessed(
                envelope.payload.refund.ok_or_else(|| missing("refund"))?.entity,
            ),
            other => GatewayEvent::Other(other.to_string()),
        };

        Ok((event, raw))
    }
}
