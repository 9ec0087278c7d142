use chrono::{DateTime, Datelike, Months, Utc};

use crate::entities::user::{self, MembershipStatus};
use crate::errors::ServiceError;

/// Membership state after a paid membership order is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipPeriod {
    pub plan_key: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Whether the monthly usage counters start over.
    pub reset_usage: bool,
}

fn add_months(from: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, ServiceError> {
    from.checked_add_months(Months::new(months))
        .ok_or_else(|| ServiceError::InternalInvariant("membership expiry overflow".to_string()))
}

/// Computes the membership period for a user buying `months` of `plan_key`.
///
/// A same-plan renewal of a live membership extends from the current expiry
/// and keeps the original start; anything else starts fresh from `now`.
pub fn next_period(
    user: &user::Model,
    plan_key: &str,
    months: u32,
    now: DateTime<Utc>,
) -> Result<MembershipPeriod, ServiceError> {
    let renewing = user.has_active_membership_at(now)
        && user.membership_plan_key.as_deref() == Some(plan_key);

    match (renewing, user.membership_expires_at) {
        (true, Some(current_expiry)) => Ok(MembershipPeriod {
            plan_key: plan_key.to_string(),
            started_at: user.membership_started_at.unwrap_or(now),
            expires_at: add_months(current_expiry, months)?,
            reset_usage: false,
        }),
        _ => Ok(MembershipPeriod {
            plan_key: plan_key.to_string(),
            started_at: now,
            expires_at: add_months(now, months)?,
            reset_usage: true,
        }),
    }
}

/// True when `period_start` falls in a different calendar month than `now`.
pub fn usage_window_elapsed(period_start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match period_start {
        Some(start) => start.year() != now.year() || start.month() != now.month(),
        None => true,
    }
}

/// ACTIVE memberships whose expiry has passed are reported as EXPIRED.
pub fn effective_status(user: &user::Model, now: DateTime<Utc>) -> MembershipStatus {
    match user.membership_status {
        MembershipStatus::Active if !user.has_active_membership_at(now) => {
            MembershipStatus::Expired
        }
        status => status,
    }
}
