//! Access checks and monthly membership quotas.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::{DbPool, TransactionScope};
use crate::entities::user::{self, MembershipStatus};
use crate::entities::{membership_plan, product, user_product, MembershipPlan, Product, User, UserProduct};
use crate::errors::ServiceError;
use crate::models::membership::usage_window_elapsed;
use crate::services::checkout::load_purchaser;

/// Why a user may (or may not) use a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Access {
    Owned,
    Membership { plan_key: String },
    Denied { reason: String },
}

impl Access {
    fn denied(reason: impl Into<String>) -> Self {
        Access::Denied {
            reason: reason.into(),
        }
    }

    pub fn is_granted(&self) -> bool {
        !matches!(self, Access::Denied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UsageKind {
    Download,
    RemixRequest,
}

/// Result of a consumed (or quota-free) use.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsageReceipt {
    pub product_id: Uuid,
    pub access: Access,
    /// Uses this month after this one; absent for owned products
    pub used_this_period: Option<i32>,
    /// Monthly allowance; absent when unlimited
    pub limit: Option<i32>,
}

#[derive(Clone)]
pub struct EntitlementService {
    db: Arc<DbPool>,
}

impl EntitlementService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Read-only access check. Does not consume quota.
    #[instrument(skip(self))]
    pub async fn check_access(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Access, ServiceError> {
        let conn = &*self.db;
        let user = load_purchaser(conn, user_id).await?;
        let product = find_product(conn, product_id).await?;
        if owns(conn, user_id, product_id).await? {
            return Ok(Access::Owned);
        }
        if !user.has_active_membership_at(now) {
            return Ok(Access::denied("no active membership"));
        }
        let Some(plan) = membership_plan_of(conn, &user).await? else {
            return Ok(Access::denied("membership plan not found"));
        };
        Ok(membership_access(&plan, &product))
    }

    pub async fn record_download(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<UsageReceipt, ServiceError> {
        self.consume(user_id, product_id, UsageKind::Download, now).await
    }

    pub async fn record_remix_request(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<UsageReceipt, ServiceError> {
        self.consume(user_id, product_id, UsageKind::RemixRequest, now)
            .await
    }

    #[instrument(skip(self), fields(kind = %kind))]
    async fn consume(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        kind: UsageKind,
        now: DateTime<Utc>,
    ) -> Result<UsageReceipt, ServiceError> {
        let scope = TransactionScope::begin(&self.db).await?;
        let result = consume_in(scope.conn(), user_id, product_id, kind, now).await;
        // lazy expiry commits even though access is refused
        let receipt = scope.finish(result).await?;

        match &receipt.access {
            Access::Denied { reason } => {
                warn!(user_id = %user_id, product_id = %product_id, reason = %reason, "access denied");
                Err(ServiceError::Forbidden(reason.clone()))
            }
            _ => {
                counter!("storefront_entitlements.used", 1, "kind" => kind.to_string());
                Ok(receipt)
            }
        }
    }
}

async fn find_product<C: ConnectionTrait>(conn: &C, product_id: Uuid) -> Result<product::Model, ServiceError> {
    Product::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

async fn owns<C: ConnectionTrait>(conn: &C, user_id: Uuid, product_id: Uuid) -> Result<bool, ServiceError> {
    Ok(UserProduct::find()
        .filter(user_product::Column::UserId.eq(user_id))
        .filter(user_product::Column::ProductId.eq(product_id))
        .one(conn)
        .await?
        .is_some())
}

async fn membership_plan_of<C: ConnectionTrait>(
    conn: &C,
    user: &user::Model,
) -> Result<Option<membership_plan::Model>, ServiceError> {
    match user.membership_plan_key.as_deref() {
        Some(key) => Ok(MembershipPlan::find_by_id(key.to_string()).one(conn).await?),
        None => Ok(None),
    }
}

fn membership_access(plan: &membership_plan::Model, product: &product::Model) -> Access {
    if !product.is_public {
        return Access::denied("product is not available to members");
    }
    if !plan.allows_format(&product.format) {
        return Access::denied(format!(
            "plan {} does not include {} files",
            plan.key, product.format
        ));
    }
    Access::Membership {
        plan_key: plan.key.clone(),
    }
}

async fn consume_in<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    product_id: Uuid,
    kind: UsageKind,
    now: DateTime<Utc>,
) -> Result<UsageReceipt, ServiceError> {
    let user = load_purchaser(conn, user_id).await?;
    let product = find_product(conn, product_id).await?;

    let denied = |reason: &str| UsageReceipt {
        product_id,
        access: Access::denied(reason),
        used_this_period: None,
        limit: None,
    };

    if owns(conn, user_id, product_id).await? {
        return Ok(UsageReceipt {
            product_id,
            access: Access::Owned,
            used_this_period: None,
            limit: None,
        });
    }

    if user.membership_status == MembershipStatus::Active && !user.has_active_membership_at(now) {
        info!(user_id = %user_id, "membership lapsed, marking expired");
        let mut lapsed: user::ActiveModel = user.into();
        lapsed.membership_status = Set(MembershipStatus::Expired);
        lapsed.updated_at = Set(now);
        lapsed.update(conn).await?;
        return Ok(denied("membership expired"));
    }
    if !user.has_active_membership_at(now) {
        return Ok(denied("no active membership"));
    }

    let Some(plan) = membership_plan_of(conn, &user).await? else {
        return Ok(denied("membership plan not found"));
    };
    let access = membership_access(&plan, &product);
    if !access.is_granted() {
        return Ok(UsageReceipt {
            product_id,
            access,
            used_this_period: None,
            limit: None,
        });
    }

    let (counter, limit) = match kind {
        UsageKind::Download => (user::Column::UsageDownloads, plan.max_downloads_per_month),
        UsageKind::RemixRequest => (
            user::Column::UsageRemixRequests,
            Some(plan.remix_request_quota),
        ),
    };
    let limit_reached = |limit: i32| {
        ServiceError::Forbidden(format!("monthly {} limit of {} reached", kind, limit))
    };
    if let Some(limit) = limit.filter(|l| *l <= 0) {
        return Err(limit_reached(limit));
    }

    let opened = usage_window_elapsed(user.usage_period_start, now)
        && open_usage_window(conn, &user, kind, now).await?;
    if !opened {
        // guarded increment; a concurrent use cannot push the counter past the limit
        let mut bump = User::update_many()
            .col_expr(counter, Expr::col(counter).add(1))
            .col_expr(user::Column::UpdatedAt, Expr::value(now))
            .filter(user::Column::Id.eq(user_id));
        if let Some(limit) = limit {
            bump = bump.filter(counter.lt(limit));
        }
        if bump.exec(conn).await?.rows_affected == 0 {
            return Err(limit_reached(limit.unwrap_or_default()));
        }
    }

    let updated = User::find_by_id(user_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;
    let used = match kind {
        UsageKind::Download => updated.usage_downloads,
        UsageKind::RemixRequest => updated.usage_remix_requests,
    };

    Ok(UsageReceipt {
        product_id,
        access,
        used_this_period: Some(used),
        limit,
    })
}

/// Starts a new monthly window with this use already counted.
///
/// Conditional on the window the caller saw; returns false when another
/// request opened it first, in which case the caller increments instead.
async fn open_usage_window<C: ConnectionTrait>(
    conn: &C,
    user: &user::Model,
    kind: UsageKind,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let (downloads, remixes) = match kind {
        UsageKind::Download => (1, 0),
        UsageKind::RemixRequest => (0, 1),
    };
    let reset = User::update_many()
        .col_expr(user::Column::UsagePeriodStart, Expr::value(Some(now)))
        .col_expr(user::Column::UsageDownloads, Expr::value(downloads))
        .col_expr(user::Column::UsageRemixRequests, Expr::value(remixes))
        .col_expr(user::Column::UpdatedAt, Expr::value(now))
        .filter(user::Column::Id.eq(user.id));
    let reset = match user.usage_period_start {
        Some(seen) => reset.filter(user::Column::UsagePeriodStart.eq(seen)),
        None => reset.filter(user::Column::UsagePeriodStart.is_null()),
    };
    let opened = reset.exec(conn).await?.rows_affected == 1;
    if opened {
        info!(user_id = %user.id, "usage window started");
    }
    Ok(opened)
}
