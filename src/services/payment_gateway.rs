use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::errors::ServiceError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("gateway response invalid: {0}")]
    InvalidResponse(String),
    #[error("gateway not configured: {0}")]
    NotConfigured(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

/// Converts a major-unit amount to integer minor units (cents, paise).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::InternalInvariant(format!("amount {} out of range", amount)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteOrderRequest {
    pub amount: i64,
    pub currency: String,
    /// Our order id
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteOrder {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
}

/// Outbound calls to the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_remote_order(
        &self,
        request: RemoteOrderRequest,
    ) -> Result<RemoteOrder, GatewayError>;

    /// Refunds `amount` minor units of a captured payment.
    async fn refund(&self, payment_id: &str, amount: i64) -> Result<GatewayRefund, GatewayError>;
}

/// REST client for the gateway's orders and refunds API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Serialize)]
struct RefundBody {
    amount: i64,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    fn ensure_configured(&self) -> Result<(), GatewayError> {
        if self.key_id.is_empty() || self.key_secret.is_empty() {
            return Err(GatewayError::NotConfigured("missing gateway credentials".into()));
        }
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "gateway call rejected");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(receipt = %request.receipt, amount = request.amount))]
    async fn create_remote_order(
        &self,
        request: RemoteOrderRequest,
    ) -> Result<RemoteOrder, GatewayError> {
        self.ensure_configured()?;
        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&request)
            .send()
            .await?;
        let order: RemoteOrder = Self::read_json(response).await?;
        info!(remote_order_id = %order.id, "remote order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn refund(&self, payment_id: &str, amount: i64) -> Result<GatewayRefund, GatewayError> {
        self.ensure_configured()?;
        let response = self
            .client
            .post(format!("{}/v1/payments/{}/refund", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&RefundBody { amount })
            .send()
            .await?;
        let refund: GatewayRefund = Self::read_json(response).await?;
        info!(refund_id = %refund.id, "refund accepted by gateway");
        Ok(refund)
    }
}
