//! Order price computation. Everything here is pure; lookups happen in the
//! checkout service.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::HashSet;

use crate::entities::product;
use crate::entities::promo_code::{self, DiscountType};
use crate::errors::ServiceError;
use crate::models::{OrderAmounts, OrderItemSnapshot};

/// Minimum payable amount forced onto orders whose total would be zero.
pub const MINIMUM_PAYABLE: Decimal = dec!(1);

/// Largest tolerated disagreement between the two total computations.
const TOTAL_TOLERANCE: Decimal = dec!(0.01);

/// Rounds half away from zero to 2 decimal places.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Deduplicates product references, keeping first-seen order.
///
/// Rejects empty requests and requests above `max_items` distinct references.
/// Runs before any storage access.
pub fn normalize_product_refs(
    refs: &[String],
    max_items: usize,
) -> Result<Vec<String>, ServiceError> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = refs
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .filter(|r| seen.insert(r.to_lowercase()))
        .collect();

    if unique.is_empty() {
        return Err(ServiceError::ValidationError(
            "at least one product is required".to_string(),
        ));
    }
    if unique.len() > max_items {
        return Err(ServiceError::ValidationError(format!(
            "an order may contain at most {} products",
            max_items
        )));
    }
    Ok(unique)
}

/// `(mrp - price) / mrp * 100`, zero when there is no markdown.
pub fn discount_percent(price: Decimal, mrp: Decimal) -> Decimal {
    if mrp <= Decimal::ZERO || price >= mrp {
        return Decimal::ZERO;
    }
    round2((mrp - price) / mrp * dec!(100))
}

/// Checks price and currency of each resolved product and snapshots it.
pub fn snapshot_items(
    products: &[product::Model],
    currency: &str,
) -> Result<Vec<OrderItemSnapshot>, ServiceError> {
    products
        .iter()
        .map(|p| {
            if p.price.is_sign_negative() {
                return Err(ServiceError::ValidationError(format!(
                    "product {} has an invalid price",
                    p.slug
                )));
            }
            if !p.currency.eq_ignore_ascii_case(currency) {
                return Err(ServiceError::CurrencyMismatch(format!(
                    "product {} is priced in {}, order currency is {}",
                    p.slug, p.currency, currency
                )));
            }
            Ok(OrderItemSnapshot {
                product_id: p.id,
                title: p.title.clone(),
                price: round2(p.price),
                mrp: round2(p.mrp),
                currency: p.currency.to_uppercase(),
                discount_percent: discount_percent(p.price, p.mrp),
            })
        })
        .collect()
}

pub fn subtotal_of(items: &[OrderItemSnapshot]) -> Decimal {
    round2(items.iter().map(|i| i.price).sum())
}

/// Discount a promo grants on `subtotal`, clamped to `[0, subtotal]`.
///
/// A subtotal under the promo's floor, or a discount that clamps to zero, is
/// an error rather than a silent no-op.
pub fn promo_discount(promo: &promo_code::Model, subtotal: Decimal) -> Result<Decimal, ServiceError> {
    if let Some(min_order_amount) = promo.min_order_amount {
        if subtotal < min_order_amount {
            return Err(ServiceError::PromoMinOrderNotMet {
                code: promo.code.clone(),
                min_order_amount,
            });
        }
    }

    let raw = match promo.discount_type {
        DiscountType::Percentage => {
            let pct = subtotal * promo.discount_value / dec!(100);
            match promo.max_discount {
                Some(cap) if cap > Decimal::ZERO => pct.min(cap),
                _ => pct,
            }
        }
        DiscountType::Flat => promo.discount_value,
    };

    let discount = round2(raw.max(Decimal::ZERO).min(subtotal));
    if discount <= Decimal::ZERO {
        return Err(ServiceError::PromoNotApplicable(promo.code.clone()));
    }
    Ok(discount)
}

/// Assembles the final amounts, forcing the minimum payable when needed.
pub fn compute_amounts(
    subtotal: Decimal,
    tax: Decimal,
    discount: Decimal,
) -> Result<OrderAmounts, ServiceError> {
    let subtotal = round2(subtotal);
    let tax = round2(tax);
    let discount = round2(discount);

    let mut total = round2(subtotal + tax - discount);
    let mut convenience_fee = Decimal::ZERO;
    if total <= Decimal::ZERO {
        convenience_fee = MINIMUM_PAYABLE;
        total = MINIMUM_PAYABLE;
    }

    let amounts = OrderAmounts {
        subtotal,
        tax,
        discount,
        convenience_fee,
        total,
    };

    let drift = (amounts.recomputed_total() - total).abs();
    if drift >= TOTAL_TOLERANCE {
        return Err(ServiceError::InternalInvariant(format!(
            "order total {} disagrees with components by {}",
            total, drift
        )));
    }
    Ok(amounts)
}

/// Clamps a requested membership duration into `[1, max_months]`.
pub fn clamp_months(requested: i64, max_months: u32) -> u32 {
    requested.clamp(1, i64::from(max_months.max(1))) as u32
}
