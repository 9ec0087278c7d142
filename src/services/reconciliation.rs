//! The two ways a payment gets confirmed: gateway webhooks and the client's
//! post-checkout verify call. Both funnel into [`SettlementService::settle`],
//! which decides who wins.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::order::{self, CancelReason, OrderStatus};
use crate::entities::Order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::OrderView;
use crate::notifications::{spawn_confirmation, EmailSender};
use crate::services::orders::{append_payment_error, find_order, load_view};
use crate::services::payment_gateway::to_minor_units;
use crate::services::refunds::{CompensationOutcome, RefundService};
use crate::services::settlement::{PaymentConfirmation, SettlementOutcome, SettlementService};
use crate::webhooks::{signature, GatewayEvent, PaymentEntity};

/// How a signed webhook delivery was handled. Every variant is acknowledged
/// to the gateway with a 2xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    Settled,
    AlreadySettled,
    Failed,
    Refunded,
    Compensated(CompensationOutcome),
    Ignored(String),
}

impl WebhookAck {
    pub fn label(&self) -> &'static str {
        match self {
            WebhookAck::Settled => "settled",
            WebhookAck::AlreadySettled => "already_settled",
            WebhookAck::Failed => "failed",
            WebhookAck::Refunded => "refunded",
            WebhookAck::Compensated(_) => "compensated",
            WebhookAck::Ignored(_) => "ignored",
        }
    }
}

/// Client confirmation after the gateway checkout completed.
#[derive(Debug, Clone)]
pub struct ClientConfirmation {
    pub remote_order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Clone)]
pub struct ReconciliationSecrets {
    /// Signs webhook bodies
    pub webhook_secret: String,
    /// Gateway key secret; signs `remote_order_id|payment_id`
    pub key_secret: String,
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DbPool>,
    settlement: SettlementService,
    refunds: RefundService,
    email: Arc<dyn EmailSender>,
    events: EventSender,
    secrets: ReconciliationSecrets,
    support_email: String,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DbPool>,
        settlement: SettlementService,
        refunds: RefundService,
        email: Arc<dyn EmailSender>,
        events: EventSender,
        secrets: ReconciliationSecrets,
        support_email: String,
    ) -> Self {
        Self {
            db,
            settlement,
            refunds,
            email,
            events,
            secrets,
            support_email,
        }
    }

    fn notify(&self, outcome: &SettlementOutcome) {
        if let SettlementOutcome::Settled { order, user } = outcome {
            spawn_confirmation(
                self.email.clone(),
                order.clone(),
                user.clone(),
                self.support_email.clone(),
            );
        }
    }

    /// Handles a gateway webhook delivery.
    ///
    /// Only a bad signature is an error. Anything else the gateway sent is
    /// acknowledged, whether or not it changed an order.
    #[instrument(skip(self, raw_body, signature_header))]
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookAck, ServiceError> {
        let signed = signature_header
            .map(|sig| signature::verify_webhook(&self.secrets.webhook_secret, raw_body, sig))
            .unwrap_or(false);
        if !signed {
            counter!("storefront_webhooks.rejected", 1);
            warn!("webhook signature rejected");
            return Err(ServiceError::InvalidSignature);
        }

        let (event, raw) = match GatewayEvent::parse(raw_body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "unreadable webhook acknowledged");
                return Ok(WebhookAck::Ignored(e.to_string()));
            }
        };
        counter!("storefront_webhooks.received", 1);

        let ack = match event {
            GatewayEvent::PaymentCaptured(payment) => self.on_captured(payment, raw, now).await?,
            GatewayEvent::PaymentFailed(payment) => self.on_failed(payment, now).await?,
            GatewayEvent::RefundProcessed(refund) => {
                if self
                    .refunds
                    .apply_refund_processed(&refund.payment_id, &refund.id, now)
                    .await?
                {
                    WebhookAck::Refunded
                } else {
                    WebhookAck::Ignored("refund for order not awaiting one".to_string())
                }
            }
            GatewayEvent::Other(name) => {
                info!(event = %name, "unhandled webhook event");
                WebhookAck::Ignored(name)
            }
        };
        Ok(ack)
    }

    async fn order_for_remote(&self, remote_order_id: Option<&str>) -> Result<Option<order::Model>, ServiceError> {
        let Some(remote_order_id) = remote_order_id else {
            return Ok(None);
        };
        Ok(Order::find()
            .filter(order::Column::RemoteOrderId.eq(remote_order_id))
            .one(&*self.db)
            .await?)
    }

    async fn on_captured(
        &self,
        payment: PaymentEntity,
        raw: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<WebhookAck, ServiceError> {
        let Some(current) = self.order_for_remote(payment.order_id.as_deref()).await? else {
            warn!(payment_id = %payment.id, "capture for unknown order");
            return Ok(WebhookAck::Ignored("unknown order".to_string()));
        };
        let order_id = current.id;

        match current.status {
            OrderStatus::Paid => {
                if current.payment_id.as_deref() != Some(payment.id.as_str()) {
                    error!(
                        alert = true,
                        order_id = %order_id,
                        payment_id = %payment.id,
                        "second capture on a paid order"
                    );
                    self.events
                        .send_or_log(Event::ManualReviewRequired {
                            order_id,
                            payment_id: Some(payment.id.clone()),
                            reason: "second capture on a paid order".to_string(),
                        })
                        .await;
                }
                return Ok(WebhookAck::AlreadySettled);
            }
            OrderStatus::Cancelled => {
                error!(order_id = %order_id, payment_id = %payment.id, "capture on a cancelled order acknowledged");
                return Ok(WebhookAck::Ignored("order cancelled".to_string()));
            }
            OrderStatus::Failed if current.payment_id.is_some() => {
                return Ok(WebhookAck::Ignored("capture already compensated".to_string()));
            }
            OrderStatus::RefundInitiated | OrderStatus::Refunded => {
                return Ok(WebhookAck::AlreadySettled);
            }
            OrderStatus::Pending | OrderStatus::Failed => {}
        }

        let payable = to_minor_units(current.total)?;
        let captured = if payment.amount > 0 { payment.amount } else { payable };
        if payment.amount > 0 && payment.amount < payable {
            warn!(order_id = %order_id, captured = payment.amount, payable, "underpaid capture");
            let outcome = self
                .refunds
                .compensate_capture(
                    order_id,
                    &payment.id,
                    captured,
                    CancelReason::Underpaid,
                    &format!("captured {} of {} minor units", payment.amount, payable),
                    now,
                )
                .await;
            return Ok(WebhookAck::Compensated(outcome));
        }

        let confirmation = PaymentConfirmation {
            payment_id: payment.id.clone(),
            signature: None,
            payload: Some(raw),
        };
        match self.settlement.settle(order_id, confirmation, now).await {
            Ok(outcome) => {
                self.notify(&outcome);
                Ok(match outcome {
                    SettlementOutcome::Settled { .. } => WebhookAck::Settled,
                    SettlementOutcome::AlreadyPaid(_) => WebhookAck::AlreadySettled,
                })
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "settlement failed after capture, compensating");
                let outcome = self
                    .refunds
                    .compensate_capture(
                        order_id,
                        &payment.id,
                        captured,
                        CancelReason::SystemCancelled,
                        &e.to_string(),
                        now,
                    )
                    .await;
                Ok(WebhookAck::Compensated(outcome))
            }
        }
    }

    async fn on_failed(&self, payment: PaymentEntity, now: DateTime<Utc>) -> Result<WebhookAck, ServiceError> {
        let Some(current) = self.order_for_remote(payment.order_id.as_deref()).await? else {
            return Ok(WebhookAck::Ignored("unknown order".to_string()));
        };
        if current.status != OrderStatus::Pending {
            return Ok(WebhookAck::Ignored(format!("order is {}", current.status)));
        }

        let cause = payment
            .error_description
            .clone()
            .unwrap_or_else(|| "payment failed".to_string());
        let errors = append_payment_error(current.payment_errors.clone(), &cause, now);
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Failed))
            .col_expr(order::Column::CancelReason, Expr::value(CancelReason::PaymentFailed))
            .col_expr(order::Column::PaymentErrors, Expr::value(errors))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(current.id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(WebhookAck::Ignored("order left pending concurrently".to_string()));
        }
        info!(order_id = %current.id, payment_id = %payment.id, "payment failed");
        self.events
            .send_or_log(Event::OrderFailed {
                order_id: current.id,
                reason: CancelReason::PaymentFailed,
            })
            .await;
        Ok(WebhookAck::Failed)
    }

    /// Confirms a payment reported by the order owner's browser.
    #[instrument(skip(self, confirmation), fields(payment_id = %confirmation.payment_id))]
    pub async fn confirm_payment_from_client(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        confirmation: ClientConfirmation,
        now: DateTime<Utc>,
    ) -> Result<OrderView, ServiceError> {
        let current = find_order(&*self.db, order_id).await?;
        if current.user_id != user_id {
            return Err(ServiceError::Forbidden("not the owner of this order".to_string()));
        }
        if current.remote_order_id.as_deref() != Some(confirmation.remote_order_id.as_str()) {
            return Err(ServiceError::ValidationError(
                "payment does not belong to this order".to_string(),
            ));
        }

        match current.status {
            OrderStatus::Paid => {
                return if current.payment_id.as_deref() == Some(confirmation.payment_id.as_str()) {
                    load_view(&*self.db, order_id).await
                } else {
                    Err(ServiceError::Conflict(
                        "order was paid with a different payment".to_string(),
                    ))
                };
            }
            OrderStatus::Pending => {}
            other => return Err(ServiceError::InvalidTransition { current: other }),
        }

        if !signature::verify_checkout(
            &self.secrets.key_secret,
            &confirmation.remote_order_id,
            &confirmation.payment_id,
            &confirmation.signature,
        ) {
            counter!("storefront_verify.rejected", 1);
            warn!(order_id = %order_id, "client payment signature rejected");
            return Err(ServiceError::InvalidSignature);
        }

        let outcome = self
            .settlement
            .settle(
                order_id,
                PaymentConfirmation {
                    payment_id: confirmation.payment_id.clone(),
                    signature: Some(confirmation.signature),
                    payload: None,
                },
                now,
            )
            .await?;

        if let SettlementOutcome::AlreadyPaid(order) = &outcome {
            // settled concurrently by the webhook with another payment id
            if order.payment_id.as_deref() != Some(confirmation.payment_id.as_str()) {
                return Err(ServiceError::Conflict(
                    "order was paid with a different payment".to_string(),
                ));
            }
        }
        self.notify(&outcome);
        Ok(outcome.order().clone())
    }
}
