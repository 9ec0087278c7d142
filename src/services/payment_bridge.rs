use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::db::DbPool;
use crate::entities::order::{self, CancelReason, OrderStatus};
use crate::entities::Order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{OrderKind, OrderView};
use crate::services::payment_gateway::{to_minor_units, PaymentGateway, RemoteOrderRequest};

/// Links PENDING orders to a payment intent at the gateway.
#[derive(Clone)]
pub struct PaymentBridge {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
}

impl PaymentBridge {
    pub fn new(db: Arc<DbPool>, gateway: Arc<dyn PaymentGateway>, events: EventSender) -> Self {
        Self { db, gateway, events }
    }

    fn request_for(order: &OrderView) -> Result<RemoteOrderRequest, ServiceError> {
        let mut notes = BTreeMap::new();
        notes.insert("order_id".to_string(), order.id.to_string());
        notes.insert("user_id".to_string(), order.user_id.to_string());
        match &order.kind {
            OrderKind::Products { items } => {
                notes.insert("purchase_type".to_string(), "product".to_string());
                notes.insert("item_count".to_string(), items.len().to_string());
            }
            OrderKind::Membership { plan_key, months } => {
                notes.insert("purchase_type".to_string(), "membership".to_string());
                notes.insert("plan_key".to_string(), plan_key.clone());
                notes.insert("months".to_string(), months.to_string());
            }
        }

        Ok(RemoteOrderRequest {
            amount: to_minor_units(order.amounts.total)?,
            currency: order.currency.clone(),
            receipt: order.id.to_string(),
            notes,
        })
    }

    /// Opens the remote order and stores its id. No retries: when the gateway
    /// call fails the pending order is cancelled with `SYSTEM_CANCELLED` and
    /// the error is returned.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn open_remote_order(
        &self,
        order: &OrderView,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let request = Self::request_for(order)?;

        let remote = match self.gateway.create_remote_order(request).await {
            Ok(remote) => remote,
            Err(e) => {
                error!(order_id = %order.id, error = %e, "gateway order creation failed");
                counter!("storefront_gateway.create_order_failed", 1);
                self.cancel_orphan(order, now).await;
                return Err(e.into());
            }
        };

        Order::update_many()
            .col_expr(order::Column::RemoteOrderId, Expr::value(remote.id.clone()))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .exec(&*self.db)
            .await?;

        info!(order_id = %order.id, remote_order_id = %remote.id, "order linked to gateway");
        Ok(remote.id)
    }

    async fn cancel_orphan(&self, order: &OrderView, now: DateTime<Utc>) {
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::CancelReason, Expr::value(CancelReason::SystemCancelled))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await;

        match result {
            Ok(_) => {
                self.events
                    .send_or_log(Event::OrderCancelled {
                        order_id: order.id,
                        reason: CancelReason::SystemCancelled,
                    })
                    .await
            }
            // the reaper will pick it up
            Err(e) => error!(order_id = %order.id, error = %e, "failed to cancel orphaned order"),
        }
    }
}
