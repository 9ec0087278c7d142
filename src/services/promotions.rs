use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::PromoCache;
use crate::db::DbPool;
use crate::entities::{promo_code, PromoCode};
use crate::errors::ServiceError;

#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DbPool>,
    cache: Arc<PromoCache>,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl PromotionService {
    pub fn new(db: Arc<DbPool>, cache: Arc<PromoCache>) -> Self {
        Self { db, cache }
    }

    /// Looks up a promo that can currently be applied.
    ///
    /// Served from the cache when possible. The usage check here is advisory;
    /// the binding check is the guarded increment at settlement.
    pub async fn find_applicable(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<promo_code::Model, ServiceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(ServiceError::PromoInvalid("empty promo code".to_string()));
        }

        let promo = match self.cache.get(&code) {
            Some(promo) => promo,
            None => {
                let promo = PromoCode::find()
                    .filter(promo_code::Column::Code.eq(code.clone()))
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ServiceError::PromoInvalid(code.clone()))?;
                self.cache.insert(promo.clone());
                promo
            }
        };

        if !promo.is_active {
            return Err(ServiceError::PromoInvalid(code));
        }
        if promo.is_expired_at(now) {
            return Err(ServiceError::PromoExpired(code));
        }
        if promo.is_exhausted() {
            debug!(code = %code, used = promo.used_count, "promo exhausted at lookup");
            return Err(ServiceError::PromoInvalid(code));
        }
        Ok(promo)
    }

    /// Increments `used_count` in a single conditional statement.
    ///
    /// Succeeds only when the code has no limit or is still below it; otherwise
    /// fails with `PromoLimitExceeded` and leaves the row untouched.
    pub async fn increment_usage<C: ConnectionTrait>(
        conn: &C,
        cache: &PromoCache,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let code = normalize_code(code);
        let under_limit = Condition::any()
            .add(promo_code::Column::UsageLimit.is_null())
            .add(promo_code::Column::UsageLimit.lte(0))
            .add(Expr::col(promo_code::Column::UsedCount).lt(Expr::col(promo_code::Column::UsageLimit)));

        let result = PromoCode::update_many()
            .col_expr(
                promo_code::Column::UsedCount,
                Expr::col(promo_code::Column::UsedCount).add(1),
            )
            .col_expr(promo_code::Column::UpdatedAt, Expr::value(now))
            .filter(promo_code::Column::Code.eq(code.clone()))
            .filter(under_limit)
            .exec(conn)
            .await?;

        cache.invalidate(&code);

        if result.rows_affected == 0 {
            warn!(code = %code, "promo usage limit reached during settlement");
            return Err(ServiceError::PromoLimitExceeded(code));
        }
        info!(code = %code, "promo usage incremented");
        Ok(())
    }
}
