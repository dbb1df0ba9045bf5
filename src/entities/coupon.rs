use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::documents::UuidList;

/// Discount code
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Upper-cased on write
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    /// Percent for `Percentage`; amount for `Fixed` when `fixed_amount` is unset
    #[sea_orm(column_type = "Decimal(Some((12, 4)))")]
    pub value: Decimal,
    #[sea_orm(nullable)]
    pub fixed_amount: Option<i64>,
    #[sea_orm(nullable)]
    pub min_purchase_amount: Option<i64>,
    /// Cap for percentage discounts
    #[sea_orm(nullable)]
    pub max_discount_amount: Option<i64>,
    #[sea_orm(nullable)]
    pub valid_from: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub valid_until: Option<DateTime<Utc>>,
    pub active: bool,
    /// `None` means unlimited
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    pub max_uses_per_user: i32,
    pub usage_count: i32,
    #[sea_orm(column_type = "Json")]
    pub used_by: UuidList,
    /// Empty means every category
    #[sea_orm(column_type = "Json")]
    pub applicable_categories: UuidList,
    /// Empty means every product
    #[sea_orm(column_type = "Json")]
    pub applicable_products: UuidList,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}
