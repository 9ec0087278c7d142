use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;
use utoipa::ToSchema;
use uuid::Uuid;

/// Consumer account projection: moderation flags, membership and the
/// monthly usage window.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub is_deleted: bool,
    pub is_banned: bool,
    #[sea_orm(nullable)]
    pub membership_plan_key: Option<String>,
    pub membership_status: MembershipStatus,
    #[sea_orm(nullable)]
    pub membership_started_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub membership_expires_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub usage_period_start: Option<DateTime<Utc>>,
    pub usage_downloads: i32,
    pub usage_remix_requests: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_product::Entity")]
    OwnedProducts,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::user_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OwnedProducts.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
    Display, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    #[sea_orm(string_value = "none")]
    None,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl Model {
    /// Deleted or banned accounts never receive entitlements.
    pub fn is_blocked(&self) -> bool {
        self.is_deleted || self.is_banned
    }

    pub fn has_active_membership_at(&self, now: DateTime<Utc>) -> bool {
        self.membership_status == MembershipStatus::Active
            && matches!(self.membership_expires_at, Some(expires_at) if expires_at > now)
    }
}
