use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::{DbPool, TransactionScope};
use crate::entities::order::{self, OrderStatus};
use crate::entities::{order_item, user, user_product, OrderItem, User, UserProduct};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{OrderAmounts, OrderItemSnapshot, OrderKind, OrderView};
use crate::services::catalog::CatalogService;
use crate::services::payment_bridge::PaymentBridge;
use crate::services::pricing;
use crate::services::promotions::{normalize_code, PromotionService};

#[derive(Debug, Clone)]
pub struct ProductOrderInput {
    /// Product ids or slugs
    pub product_refs: Vec<String>,
    pub currency: String,
    pub promo_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MembershipOrderInput {
    pub plan_key: String,
    pub months: i64,
    pub currency: String,
}

/// What the client needs to open the gateway checkout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResult {
    pub order_id: Uuid,
    pub amount_payable: Decimal,
    pub currency: String,
    pub remote_order_id: String,
    pub order: OrderView,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckoutLimits {
    pub max_items_per_order: usize,
    pub max_membership_months: u32,
}

impl Default for CheckoutLimits {
    fn default() -> Self {
        Self {
            max_items_per_order: 50,
            max_membership_months: 12,
        }
    }
}

/// Loads a user eligible to purchase: deleted accounts read as missing,
/// banned accounts are refused.
pub async fn load_purchaser<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<user::Model, ServiceError> {
    let user = User::find_by_id(user_id)
        .one(conn)
        .await?
        .filter(|u| !u.is_deleted)
        .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;
    if user.is_banned {
        return Err(ServiceError::Forbidden("account is suspended".to_string()));
    }
    Ok(user)
}

fn normalize_currency(currency: &str) -> Result<String, ServiceError> {
    let currency = currency.trim().to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ServiceError::ValidationError(format!(
            "invalid currency code '{}'",
            currency
        )));
    }
    Ok(currency)
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    catalog: CatalogService,
    promotions: PromotionService,
    bridge: PaymentBridge,
    events: EventSender,
    limits: CheckoutLimits,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        catalog: CatalogService,
        promotions: PromotionService,
        bridge: PaymentBridge,
        events: EventSender,
        limits: CheckoutLimits,
    ) -> Self {
        Self {
            db,
            catalog,
            promotions,
            bridge,
            events,
            limits,
        }
    }

    async fn owned_among(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let owned = UserProduct::find()
            .filter(user_product::Column::UserId.eq(user_id))
            .filter(user_product::Column::ProductId.is_in(ids.to_vec()))
            .all(&*self.db)
            .await?;
        Ok(owned.into_iter().map(|o| o.product_id).collect())
    }

    /// Prices a product cart and persists it as a PENDING order linked to the gateway.
    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn create_product_order(
        &self,
        user_id: Uuid,
        input: ProductOrderInput,
        now: DateTime<Utc>,
    ) -> Result<CheckoutResult, ServiceError> {
        let refs = pricing::normalize_product_refs(&input.product_refs, self.limits.max_items_per_order)?;
        let currency = normalize_currency(&input.currency)?;

        load_purchaser(&*self.db, user_id).await?;

        // ids are checked before the catalog lookup, slugs after it
        let direct_ids: Vec<Uuid> = refs.iter().filter_map(|r| Uuid::parse_str(r).ok()).collect();
        let owned = self.owned_among(user_id, &direct_ids).await?;
        if !owned.is_empty() {
            warn!(user_id = %user_id, owned = owned.len(), "duplicate purchase rejected");
            return Err(ServiceError::DuplicatePurchase { product_ids: owned });
        }

        let resolved = self.catalog.find_public_by_ids_or_slugs(&refs).await?;
        if !resolved.missing.is_empty() {
            return Err(ServiceError::ProductsUnavailable {
                missing: resolved.missing,
            });
        }

        let resolved_ids: Vec<Uuid> = resolved.products.iter().map(|p| p.id).collect();
        let owned = self.owned_among(user_id, &resolved_ids).await?;
        if !owned.is_empty() {
            return Err(ServiceError::DuplicatePurchase { product_ids: owned });
        }

        let items = pricing::snapshot_items(&resolved.products, &currency)?;
        let subtotal = pricing::subtotal_of(&items);

        let (promo_code, discount) = match input.promo_code.as_deref().map(normalize_code) {
            Some(code) if !code.is_empty() => {
                let promo = self.promotions.find_applicable(&code, now).await?;
                let discount = pricing::promo_discount(&promo, subtotal)?;
                (Some(promo.code), discount)
            }
            _ => (None, Decimal::ZERO),
        };

        let amounts = pricing::compute_amounts(subtotal, Decimal::ZERO, discount)?;
        let kind = OrderKind::Products { items };
        self.place_order(user_id, kind, currency, amounts, promo_code, now)
            .await
    }

    /// Prices a membership purchase and persists it as a PENDING order.
    #[instrument(skip(self, input), fields(user_id = %user_id, plan_key = %input.plan_key))]
    pub async fn create_membership_order(
        &self,
        user_id: Uuid,
        input: MembershipOrderInput,
        now: DateTime<Utc>,
    ) -> Result<CheckoutResult, ServiceError> {
        let currency = normalize_currency(&input.currency)?;
        load_purchaser(&*self.db, user_id).await?;

        let plan = self.catalog.find_active_plan(input.plan_key.trim()).await?;
        if !plan.currency.eq_ignore_ascii_case(&currency) {
            return Err(ServiceError::CurrencyMismatch(format!(
                "plan {} is priced in {}, order currency is {}",
                plan.key, plan.currency, currency
            )));
        }
        if plan.price <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "plan {} has no valid price",
                plan.key
            )));
        }

        let months = pricing::clamp_months(input.months, self.limits.max_membership_months);
        let subtotal = plan.price * Decimal::from(months);
        let amounts = pricing::compute_amounts(subtotal, Decimal::ZERO, Decimal::ZERO)?;
        let kind = OrderKind::Membership {
            plan_key: plan.key,
            months,
        };
        self.place_order(user_id, kind, currency, amounts, None, now)
            .await
    }

    async fn place_order(
        &self,
        user_id: Uuid,
        kind: OrderKind,
        currency: String,
        amounts: OrderAmounts,
        promo_code: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CheckoutResult, ServiceError> {
        let order_id = Uuid::new_v4();

        let scope = TransactionScope::begin(&self.db).await?;
        let result = insert_order(
            scope.conn(),
            order_id,
            user_id,
            &kind,
            &currency,
            &amounts,
            promo_code,
            now,
        )
        .await;
        let view = scope.finish(result).await?;

        counter!("storefront_orders.created", 1, "kind" => kind.tag().to_string());
        info!(order_id = %order_id, total = %amounts.total, "pending order created");
        self.events
            .send_or_log(Event::OrderCreated {
                order_id,
                user_id,
                total: amounts.total,
            })
            .await;

        let remote_order_id = self.bridge.open_remote_order(&view, now).await?;

        Ok(CheckoutResult {
            order_id,
            amount_payable: amounts.total,
            currency: view.currency.clone(),
            remote_order_id: remote_order_id.clone(),
            order: OrderView {
                remote_order_id: Some(remote_order_id),
                ..view
            },
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    user_id: Uuid,
    kind: &OrderKind,
    currency: &str,
    amounts: &OrderAmounts,
    promo_code: Option<String>,
    now: DateTime<Utc>,
) -> Result<OrderView, ServiceError> {
    let (plan_key, months) = match kind {
        OrderKind::Membership { plan_key, months } => (Some(plan_key.clone()), Some(*months as i32)),
        OrderKind::Products { .. } => (None, None),
    };

    let model = order::ActiveModel {
        id: Set(order_id),
        user_id: Set(user_id),
        kind: Set(kind.tag()),
        membership_plan_key: Set(plan_key),
        membership_months: Set(months),
        currency: Set(currency.to_string()),
        subtotal: Set(amounts.subtotal),
        tax: Set(amounts.tax),
        discount: Set(amounts.discount),
        convenience_fee: Set(amounts.convenience_fee),
        total: Set(amounts.total),
        promo_code: Set(promo_code),
        status: Set(OrderStatus::Pending),
        cancel_reason: Set(None),
        remote_order_id: Set(None),
        payment_id: Set(None),
        payment_signature: Set(None),
        gateway_payload: Set(None),
        refund_id: Set(None),
        payment_errors: Set(None),
        completed_at: Set(None),
        refunded_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut items = Vec::new();
    if let OrderKind::Products { items: snapshots } = kind {
        let mut seen = HashSet::new();
        for (position, item) in snapshots.iter().enumerate() {
            if !seen.insert(item.product_id) {
                return Err(ServiceError::InternalInvariant(format!(
                    "product {} appears twice in order {}",
                    item.product_id, order_id
                )));
            }
            items.push(item_model(order_id, position as i32, item));
        }
    }
    if !items.is_empty() {
        OrderItem::insert_many(items.iter().map(item_row))
            .exec_without_returning(conn)
            .await?;
    }

    OrderView::from_parts(model, items)
}

fn item_model(order_id: Uuid, position: i32, item: &OrderItemSnapshot) -> order_item::Model {
    order_item::Model {
        id: Uuid::new_v4(),
        order_id,
        product_id: item.product_id,
        position,
        title: item.title.clone(),
        price: item.price,
        mrp: item.mrp,
        currency: item.currency.clone(),
        discount_percent: item.discount_percent,
    }
}

fn item_row(item: &order_item::Model) -> order_item::ActiveModel {
    order_item::ActiveModel {
        id: Set(item.id),
        order_id: Set(item.order_id),
        product_id: Set(item.product_id),
        position: Set(item.position),
        title: Set(item.title.clone()),
        price: Set(item.price),
        mrp: Set(item.mrp),
        currency: Set(item.currency.clone()),
        discount_percent: Set(item.discount_percent),
    }
}
