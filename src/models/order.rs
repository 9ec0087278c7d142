use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, CancelReason, OrderKindTag, OrderStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;

/// Per-item snapshot captured when the order was placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemSnapshot {
    pub product_id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub mrp: Decimal,
    pub currency: String,
    pub discount_percent: Decimal,
}

impl From<order_item::Model> for OrderItemSnapshot {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            title: item.title,
            price: item.price,
            mrp: item.mrp,
            currency: item.currency,
            discount_percent: item.discount_percent,
        }
    }
}

/// What the order buys. An order is exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    Products { items: Vec<OrderItemSnapshot> },
    Membership { plan_key: String, months: u32 },
}

impl OrderKind {
    pub fn tag(&self) -> OrderKindTag {
        match self {
            OrderKind::Products { .. } => OrderKindTag::Product,
            OrderKind::Membership { .. } => OrderKindTag::Membership,
        }
    }

    pub fn product_ids(&self) -> Vec<Uuid> {
        match self {
            OrderKind::Products { items } => items.iter().map(|i| i.product_id).collect(),
            OrderKind::Membership { .. } => Vec::new(),
        }
    }
}

/// Monetary breakdown of an order, all values rounded to 2 places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderAmounts {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub convenience_fee: Decimal,
    pub total: Decimal,
}

impl OrderAmounts {
    pub fn from_model(model: &order::Model) -> Self {
        Self {
            subtotal: model.subtotal,
            tax: model.tax,
            discount: model.discount,
            convenience_fee: model.convenience_fee,
            total: model.total,
        }
    }

    /// `subtotal + tax - discount + convenience_fee`
    pub fn recomputed_total(&self) -> Decimal {
        self.subtotal + self.tax - self.discount + self.convenience_fee
    }
}

/// Order read model: the row plus its payload reassembled into [`OrderKind`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub cancel_reason: Option<CancelReason>,
    pub kind: OrderKind,
    pub currency: String,
    pub amounts: OrderAmounts,
    pub promo_code: Option<String>,
    pub remote_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub refund_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    /// Rebuilds the view from an order row and its item rows.
    ///
    /// Rows that carry both a membership payload and items, or neither, are
    /// rejected as corrupt.
    pub fn from_parts(
        model: order::Model,
        mut items: Vec<order_item::Model>,
    ) -> Result<Self, ServiceError> {
        let has_plan = model.membership_plan_key.is_some();
        let kind = match (model.kind, has_plan, items.is_empty()) {
            (OrderKindTag::Product, false, false) => {
                items.sort_by_key(|i| i.position);
                OrderKind::Products {
                    items: items.into_iter().map(OrderItemSnapshot::from).collect(),
                }
            }
            (OrderKindTag::Membership, true, true) => {
                let months = model.membership_months.unwrap_or(0);
                if months <= 0 {
                    return Err(ServiceError::InternalInvariant(format!(
                        "membership order {} has no duration",
                        model.id
                    )));
                }
                OrderKind::Membership {
                    plan_key: model.membership_plan_key.clone().unwrap_or_default(),
                    months: months as u32,
                }
            }
            _ => {
                return Err(ServiceError::InternalInvariant(format!(
                    "order {} payload does not match its kind {}",
                    model.id, model.kind
                )))
            }
        };

        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            status: model.status,
            cancel_reason: model.cancel_reason,
            kind,
            amounts: OrderAmounts::from_model(&model),
            currency: model.currency,
            promo_code: model.promo_code,
            remote_order_id: model.remote_order_id,
            payment_id: model.payment_id,
            refund_id: model.refund_id,
            completed_at: model.completed_at,
            refunded_at: model.refunded_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
