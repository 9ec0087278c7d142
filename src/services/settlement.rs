//! Marks orders PAID exactly once and grants what they bought.
//!
//! The status compare-and-set inside the transaction is the idempotency
//! boundary: any number of concurrent or repeated `settle` calls for one
//! order produce at most one PENDING -> PAID transition and one grant.
//! Callers treat [`SettlementOutcome::AlreadyPaid`] as success.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::PromoCache;
use crate::db::{DbPool, TransactionScope};
use crate::entities::order::{self, OrderStatus};
use crate::entities::user::{self, MembershipStatus};
use crate::entities::user_product::{self, OwnershipSource};
use crate::entities::{Order, User, UserProduct};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::membership::next_period;
use crate::models::{OrderKind, OrderView};
use crate::services::orders::{find_order, load_view};
use crate::services::promotions::PromotionService;

/// Payment details recorded on the order when it becomes PAID.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub payment_id: String,
    pub signature: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    /// This call performed the transition and the grant.
    Settled {
        order: OrderView,
        user: user::Model,
    },
    /// The order was already PAID; nothing was granted.
    AlreadyPaid(OrderView),
}

impl SettlementOutcome {
    pub fn order(&self) -> &OrderView {
        match self {
            SettlementOutcome::Settled { order, .. } => order,
            SettlementOutcome::AlreadyPaid(order) => order,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SettlementOutcome::Settled { .. })
    }
}

#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DbPool>,
    promo_cache: Arc<PromoCache>,
    events: EventSender,
}

impl SettlementService {
    pub fn new(db: Arc<DbPool>, promo_cache: Arc<PromoCache>, events: EventSender) -> Self {
        Self {
            db,
            promo_cache,
            events,
        }
    }

    /// Settles `order_id` with the given payment. All writes share one
    /// transaction; any failure rolls every one of them back.
    #[instrument(skip(self, confirmation), fields(order_id = %order_id, payment_id = %confirmation.payment_id))]
    pub async fn settle(
        &self,
        order_id: Uuid,
        confirmation: PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, ServiceError> {
        let scope = TransactionScope::begin(&self.db).await?;
        let result = self
            .settle_in(scope.conn(), order_id, &confirmation, now)
            .await;
        let outcome = match scope.finish(result).await {
            Ok(outcome) => outcome,
            Err(e) => {
                counter!("storefront_settlement.failed", 1);
                warn!(order_id = %order_id, error = %e, "settlement aborted");
                return Err(e);
            }
        };

        match &outcome {
            SettlementOutcome::Settled { order, .. } => {
                counter!("storefront_settlement.settled", 1);
                info!(order_id = %order.id, total = %order.amounts.total, "order settled");
                self.events
                    .send_or_log(Event::OrderPaid {
                        order_id,
                        payment_id: confirmation.payment_id.clone(),
                    })
                    .await;
            }
            SettlementOutcome::AlreadyPaid(_) => {
                counter!("storefront_settlement.replayed", 1);
                debug!(order_id = %order_id, "order already paid");
            }
        }
        Ok(outcome)
    }

    async fn settle_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        confirmation: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, ServiceError> {
        let current = find_order(conn, order_id).await?;
        match current.status {
            OrderStatus::Paid => return Ok(SettlementOutcome::AlreadyPaid(load_view(conn, order_id).await?)),
            OrderStatus::Pending => {}
            other => return Err(ServiceError::InvalidTransition { current: other }),
        }

        let flipped = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::PaymentId, Expr::value(confirmation.payment_id.clone()))
            .col_expr(order::Column::PaymentSignature, Expr::value(confirmation.signature.clone()))
            .col_expr(order::Column::GatewayPayload, Expr::value(confirmation.payload.clone()))
            .col_expr(order::Column::CompletedAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(conn)
            .await?;

        if flipped.rows_affected == 0 {
            // lost the race to another settlement or a cancellation
            let latest = find_order(conn, order_id).await?;
            return match latest.status {
                OrderStatus::Paid => Ok(SettlementOutcome::AlreadyPaid(load_view(conn, order_id).await?)),
                other => Err(ServiceError::InvalidTransition { current: other }),
            };
        }

        if let Some(code) = current.promo_code.as_deref() {
            PromotionService::increment_usage(conn, &self.promo_cache, code, now).await?;
        }

        let user = User::find_by_id(current.user_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidUserState(format!("user {} no longer exists", current.user_id))
            })?;
        if user.is_blocked() {
            return Err(ServiceError::InvalidUserState(format!(
                "user {} is deleted or banned",
                user.id
            )));
        }

        let order = load_view(conn, order_id).await?;
        let user = match &order.kind {
            OrderKind::Membership { plan_key, months } => {
                grant_membership(conn, user, plan_key, *months, now).await?
            }
            OrderKind::Products { .. } => {
                grant_products(conn, user.id, order_id, &order.kind.product_ids(), now).await?;
                user
            }
        };

        Ok(SettlementOutcome::Settled { order, user })
    }
}

async fn grant_membership<C: ConnectionTrait>(
    conn: &C,
    user: user::Model,
    plan_key: &str,
    months: u32,
    now: DateTime<Utc>,
) -> Result<user::Model, ServiceError> {
    let period = next_period(&user, plan_key, months, now)?;
    debug!(
        user_id = %user.id,
        expires_at = %period.expires_at,
        renewal = !period.reset_usage,
        "granting membership"
    );

    let mut active: user::ActiveModel = user.into();
    active.membership_plan_key = Set(Some(period.plan_key));
    active.membership_status = Set(MembershipStatus::Active);
    active.membership_started_at = Set(Some(period.started_at));
    active.membership_expires_at = Set(Some(period.expires_at));
    if period.reset_usage {
        active.usage_period_start = Set(Some(now));
        active.usage_downloads = Set(0);
        active.usage_remix_requests = Set(0);
    }
    active.updated_at = Set(now);
    Ok(active.update(conn).await?)
}

/// Adds products to the owned set; products already owned are skipped.
async fn grant_products<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
    product_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<u64, ServiceError> {
    let mut granted = 0;
    for product_id in product_ids {
        let row = user_product::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(*product_id),
            source: Set(OwnershipSource::Order),
            order_id: Set(Some(order_id)),
            acquired_at: Set(now),
        };
        granted += UserProduct::insert(row)
            .on_conflict(
                OnConflict::columns([user_product::Column::UserId, user_product::Column::ProductId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    debug!(user_id = %user_id, granted, requested = product_ids.len(), "products granted");
    Ok(granted)
}
