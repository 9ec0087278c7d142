use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Membership plan catalog entry. Read-only for the order engine.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "membership_plans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub name: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub price: Decimal,
    pub currency: String,
    /// `None` means unlimited downloads
    #[sea_orm(nullable)]
    pub max_downloads_per_month: Option<i32>,
    /// JSON array of allowed formats; empty array allows every format
    #[sea_orm(column_type = "Json")]
    pub allowed_formats: Json,
    pub commercial_use: bool,
    pub remix_request_quota: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn allows_format(&self, format: &str) -> bool {
        match self.allowed_formats.as_array() {
            Some(formats) if !formats.is_empty() => formats
                .iter()
                .filter_map(|f| f.as_str())
                .any(|f| f.eq_ignore_ascii_case(format)),
            _ => true,
        }
    }
}
