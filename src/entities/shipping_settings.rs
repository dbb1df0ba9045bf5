use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::documents::RegionRules;

/// Singleton row (`id = 1`) holding shipping fees and the tax rate
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipping_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub base_fee: i64,
    #[sea_orm(nullable)]
    pub free_shipping_threshold: Option<i64>,
    #[sea_orm(column_type = "Decimal(Some((6, 3)))")]
    pub tax_rate: Decimal,
    #[sea_orm(column_type = "Json")]
    pub region_rules: RegionRules,
    pub updated_at: DateTime<Utc>,
}

pub const SINGLETON_ID: i32 = 1;

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
