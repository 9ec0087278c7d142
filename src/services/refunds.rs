use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::{DbPool, TransactionScope};
use crate::entities::order::{self, CancelReason, OrderStatus};
use crate::entities::user::{self, MembershipStatus};
use crate::entities::user_product::{self, OwnershipSource};
use crate::entities::{Order, User, UserProduct};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{OrderKind, OrderView};
use crate::services::orders::{append_payment_error, find_order, load_view};
use crate::services::payment_gateway::{to_minor_units, PaymentGateway};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundResult {
    pub order_id: Uuid,
    pub refund_id: String,
}

/// How a captured-but-undeliverable payment was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationOutcome {
    Refunded { refund_id: String },
    /// Order failed, refund call did not go through
    RefundFailed,
    /// The order could not be forced to FAILED; nothing was refunded
    ManualReview,
}

#[derive(Clone)]
pub struct RefundService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
}

impl RefundService {
    pub fn new(db: Arc<DbPool>, gateway: Arc<dyn PaymentGateway>, events: EventSender) -> Self {
        Self { db, gateway, events }
    }

    /// Admin refund of a PAID order.
    ///
    /// Locks the order in REFUND_INITIATED, revokes access, then calls the
    /// gateway. A failed gateway call puts the order back to PAID so the
    /// refund can be retried; revoked access stays revoked.
    #[instrument(skip(self))]
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RefundResult, ServiceError> {
        let current = find_order(&*self.db, order_id).await?;
        if current.status != OrderStatus::Paid {
            return Err(ServiceError::InvalidTransition {
                current: current.status,
            });
        }
        let payment_id = current.payment_id.clone().ok_or_else(|| {
            ServiceError::InternalInvariant(format!("paid order {} has no payment id", order_id))
        })?;
        let amount = to_minor_units(current.total)?;

        let locked = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::RefundInitiated))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Paid))
            .exec(&*self.db)
            .await?;
        if locked.rows_affected == 0 {
            let latest = find_order(&*self.db, order_id).await?;
            return Err(ServiceError::InvalidTransition {
                current: latest.status,
            });
        }
        self.events
            .send_or_log(Event::RefundInitiated { order_id })
            .await;

        let scope = TransactionScope::begin(&self.db).await?;
        let revoked = revoke_access(scope.conn(), order_id, now).await;
        if let Err(e) = scope.finish(revoked).await {
            error!(order_id = %order_id, error = %e, "access revocation failed, unlocking order");
            self.unlock(order_id, &e.to_string(), now).await?;
            return Err(e);
        }

        match self.gateway.refund(&payment_id, amount).await {
            Ok(refund) => {
                let done = Order::update_many()
                    .col_expr(order::Column::Status, Expr::value(OrderStatus::Refunded))
                    .col_expr(order::Column::RefundId, Expr::value(refund.id.clone()))
                    .col_expr(order::Column::RefundedAt, Expr::value(now))
                    .col_expr(order::Column::UpdatedAt, Expr::value(now))
                    .filter(order::Column::Id.eq(order_id))
                    .filter(order::Column::Status.eq(OrderStatus::RefundInitiated))
                    .exec(&*self.db)
                    .await?;
                if done.rows_affected == 0 {
                    // refund.processed webhook got there first
                    info!(order_id = %order_id, "order already marked refunded");
                }
                counter!("storefront_refunds.completed", 1);
                info!(order_id = %order_id, refund_id = %refund.id, "order refunded");
                self.events
                    .send_or_log(Event::OrderRefunded {
                        order_id,
                        refund_id: refund.id.clone(),
                    })
                    .await;
                Ok(RefundResult {
                    order_id,
                    refund_id: refund.id,
                })
            }
            Err(e) => {
                counter!("storefront_refunds.failed", 1);
                error!(order_id = %order_id, error = %e, "refund call failed, order back to PAID");
                self.unlock(order_id, &e.to_string(), now).await?;
                self.events
                    .send_or_log(Event::RefundFailed {
                        order_id,
                        error: e.to_string(),
                    })
                    .await;
                Err(e.into())
            }
        }
    }

    /// REFUND_INITIATED -> PAID with the failure appended to the error log.
    async fn unlock(&self, order_id: Uuid, cause: &str, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let latest = find_order(&*self.db, order_id).await?;
        let errors = append_payment_error(latest.payment_errors, cause, now);
        Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::PaymentErrors, Expr::value(errors))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::RefundInitiated))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Returns a captured payment that could not be turned into access.
    ///
    /// The order is forced to FAILED only if it is still unpaid and carries
    /// no payment; the refund is issued only when that transition succeeds,
    /// so a capture is never refunded twice.
    #[instrument(skip(self, cause))]
    pub async fn compensate_capture(
        &self,
        order_id: Uuid,
        payment_id: &str,
        amount: i64,
        reason: CancelReason,
        cause: &str,
        now: DateTime<Utc>,
    ) -> CompensationOutcome {
        counter!("storefront_compensation.started", 1);
        let existing_errors = match find_order(&*self.db, order_id).await {
            Ok(existing) => existing.payment_errors,
            Err(_) => None,
        };

        let forced = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Failed))
            .col_expr(order::Column::CancelReason, Expr::value(reason))
            .col_expr(order::Column::PaymentId, Expr::value(payment_id.to_string()))
            .col_expr(
                order::Column::PaymentErrors,
                Expr::value(append_payment_error(existing_errors, cause, now)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in([OrderStatus::Pending, OrderStatus::Failed]))
            .filter(order::Column::PaymentId.is_null())
            .exec(&*self.db)
            .await;

        match forced {
            Ok(r) if r.rows_affected == 1 => {}
            other => {
                let detail = match other {
                    Err(e) => e.to_string(),
                    Ok(_) => "order not in a refundable state".to_string(),
                };
                error!(
                    alert = true,
                    order_id = %order_id,
                    payment_id = %payment_id,
                    error = %detail,
                    "could not fail order for captured payment, manual review required"
                );
                counter!("storefront_compensation.manual_review", 1);
                self.events
                    .send_or_log(Event::ManualReviewRequired {
                        order_id,
                        payment_id: Some(payment_id.to_string()),
                        reason: format!("{}: {}", cause, detail),
                    })
                    .await;
                return CompensationOutcome::ManualReview;
            }
        }

        warn!(order_id = %order_id, reason = %reason, "order failed after capture, refunding");
        self.events
            .send_or_log(Event::OrderFailed { order_id, reason })
            .await;

        match self.gateway.refund(payment_id, amount).await {
            Ok(refund) => {
                let stored = Order::update_many()
                    .col_expr(order::Column::RefundId, Expr::value(refund.id.clone()))
                    .col_expr(order::Column::RefundedAt, Expr::value(now))
                    .col_expr(order::Column::UpdatedAt, Expr::value(now))
                    .filter(order::Column::Id.eq(order_id))
                    .exec(&*self.db)
                    .await;
                if let Err(e) = stored {
                    error!(order_id = %order_id, refund_id = %refund.id, error = %e, "failed to record refund id");
                }
                counter!("storefront_compensation.refunded", 1);
                info!(order_id = %order_id, refund_id = %refund.id, "captured payment refunded");
                CompensationOutcome::Refunded {
                    refund_id: refund.id,
                }
            }
            Err(e) => {
                error!(alert = true, order_id = %order_id, error = %e, "compensating refund failed");
                if let Ok(failed) = find_order(&*self.db, order_id).await {
                    let errors = append_payment_error(failed.payment_errors, &e.to_string(), now);
                    if let Err(db_err) = Order::update_many()
                        .col_expr(order::Column::PaymentErrors, Expr::value(errors))
                        .filter(order::Column::Id.eq(order_id))
                        .exec(&*self.db)
                        .await
                    {
                        error!(order_id = %order_id, error = %db_err, "failed to record refund error");
                    }
                }
                self.events
                    .send_or_log(Event::RefundFailed {
                        order_id,
                        error: e.to_string(),
                    })
                    .await;
                self.events
                    .send_or_log(Event::ManualReviewRequired {
                        order_id,
                        payment_id: Some(payment_id.to_string()),
                        reason: format!("compensating refund failed: {}", e),
                    })
                    .await;
                CompensationOutcome::RefundFailed
            }
        }
    }

    /// Applies an asynchronous refund confirmation from the gateway.
    /// Only PAID or REFUND_INITIATED orders move to REFUNDED.
    #[instrument(skip(self))]
    pub async fn apply_refund_processed(
        &self,
        payment_id: &str,
        refund_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Refunded))
            .col_expr(order::Column::RefundId, Expr::value(refund_id.to_string()))
            .col_expr(order::Column::RefundedAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::PaymentId.eq(payment_id))
            .filter(order::Column::Status.is_in([OrderStatus::Paid, OrderStatus::RefundInitiated]))
            .exec(&*self.db)
            .await?;

        let applied = result.rows_affected > 0;
        if applied {
            info!(payment_id = %payment_id, refund_id = %refund_id, "refund confirmed");
        } else {
            warn!(payment_id = %payment_id, refund_id = %refund_id, "refund confirmation ignored");
        }
        Ok(applied)
    }
}

/// Removes what a refunded order granted: its membership is expired on the
/// spot, its products leave the owned set.
async fn revoke_access<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let view: OrderView = load_view(conn, order_id).await?;
    match &view.kind {
        OrderKind::Membership { plan_key, .. } => {
            let Some(user) = User::find_by_id(view.user_id).one(conn).await? else {
                return Ok(());
            };
            if user.membership_plan_key.as_deref() != Some(plan_key.as_str()) {
                return Ok(());
            }
            let mut active: user::ActiveModel = user.into();
            active.membership_status = Set(MembershipStatus::Refunded);
            active.membership_expires_at = Set(Some(now));
            active.updated_at = Set(now);
            active.update(conn).await?;
            info!(order_id = %order_id, user_id = %view.user_id, "membership revoked");
        }
        OrderKind::Products { .. } => {
            let removed = UserProduct::delete_many()
                .filter(user_product::Column::UserId.eq(view.user_id))
                .filter(user_product::Column::ProductId.is_in(view.kind.product_ids()))
                .filter(user_product::Column::Source.eq(OwnershipSource::Order))
                .exec(conn)
                .await?;
            info!(order_id = %order_id, removed = removed.rows_affected, "products revoked");
        }
    }
    Ok(())
}
