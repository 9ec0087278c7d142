use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::order::{self, CancelReason, OrderStatus};
use crate::entities::{order_item, Order, OrderItem};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::OrderView;

/// Who is acting on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(Uuid),
    Admin(Uuid),
}

impl Actor {
    pub fn id(&self) -> Uuid {
        match self {
            Actor::User(id) | Actor::Admin(id) => *id,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }

    fn may_access(&self, order: &order::Model) -> bool {
        self.is_admin() || order.user_id == self.id()
    }
}

/// Loads an order row or fails with `NotFound`.
pub async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    Order::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// Loads an order with its items as an [`OrderView`].
pub async fn load_view<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<OrderView, ServiceError> {
    let model = find_order(conn, order_id).await?;
    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?;
    OrderView::from_parts(model, items)
}

/// Appends a timestamped entry to an order's `payment_errors` log.
pub fn append_payment_error(existing: Option<Value>, message: &str, now: DateTime<Utc>) -> Value {
    let entry = json!({ "at": now.to_rfc3339(), "error": message });
    match existing {
        Some(Value::Array(mut entries)) => {
            entries.push(entry);
            Value::Array(entries)
        }
        _ => Value::Array(vec![entry]),
    }
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    events: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, events: EventSender) -> Self {
        Self { db, events }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, actor: Actor, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let view = load_view(&*self.db, order_id).await?;
        if !actor.is_admin() && view.user_id != actor.id() {
            // indistinguishable from a missing order
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        Ok(view)
    }

    /// Cancels a PENDING order with no payment attached.
    ///
    /// Owners cancel with `USER_CANCELLED`, admins with `ADMIN_CANCELLED`.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        actor: Actor,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<OrderView, ServiceError> {
        let current = find_order(&*self.db, order_id).await?;
        if !actor.may_access(&current) {
            return Err(ServiceError::Forbidden("not the owner of this order".to_string()));
        }

        let reason = if actor.is_admin() {
            CancelReason::AdminCancelled
        } else {
            CancelReason::UserCancelled
        };

        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::CancelReason, Expr::value(reason))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentId.is_null())
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let latest = find_order(&*self.db, order_id).await?;
            if latest.status == OrderStatus::Pending {
                return Err(ServiceError::Conflict(
                    "a payment is already attached to this order".to_string(),
                ));
            }
            return Err(ServiceError::InvalidTransition {
                current: latest.status,
            });
        }

        info!(order_id = %order_id, reason = %reason, "order cancelled");
        self.events
            .send_or_log(Event::OrderCancelled { order_id, reason })
            .await;
        load_view(&*self.db, order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_errors_accumulate() {
        let now = Utc::now();
        let first = append_payment_error(None, "timeout", now);
        let second = append_payment_error(Some(first), "502", now);
        let entries = second.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["error"], "502");
    }

    #[test]
    fn admin_may_access_any_order() {
        let owner = Uuid::new_v4();
        assert!(Actor::Admin(Uuid::new_v4()).is_admin());
        assert_eq!(Actor::User(owner).id(), owner);
    }
}
