use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        coupon::{Column as CouponColumn, Entity as CouponEntity},
        order::{self, Column as OrderColumn, Entity as OrderEntity},
        transaction::{Column as TransactionColumn, Entity as TransactionEntity, TransactionStatus},
    },
    errors::ServiceError,
};

pub const DEFAULT_PERIOD_DAYS: i64 = 30;
pub const MAX_PERIOD_DAYS: i64 = 365;
const TOP_PRODUCTS: usize = 10;

/// Bucket size for revenue series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Day,
    Month,
}

impl GroupBy {
    fn format(&self) -> &'static str {
        match self {
            GroupBy::Day => "%Y-%m-%d",
            GroupBy::Month => "%Y-%m",
        }
    }
}

impl FromStr for GroupBy {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(GroupBy::Day),
            "month" => Ok(GroupBy::Month),
            other => Err(ServiceError::ValidationError(format!(
                "groupBy must be day or month, got {}",
                other
            ))),
        }
    }
}

/// Reporting window in days, 1..=365
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period(i64);

impl Period {
    pub fn new(days: Option<i64>) -> Result<Self, ServiceError> {
        let days = days.unwrap_or(DEFAULT_PERIOD_DAYS);
        if !(1..=MAX_PERIOD_DAYS).contains(&days) {
            return Err(ServiceError::ValidationError(format!(
                "period must be between 1 and {} days",
                MAX_PERIOD_DAYS
            )));
        }
        Ok(Self(days))
    }

    pub fn days(&self) -> i64 {
        self.0
    }

    fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.0)
    }
}

impl Default for Period {
    fn default() -> Self {
        Self(DEFAULT_PERIOD_DAYS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub period_days: i64,
    pub revenue: i64,
    pub order_count: u64,
    pub average_order_value: i64,
    pub customers: u64,
    /// Transaction counts keyed by status
    pub transactions: BTreeMap<String, u64>,
    /// Succeeded over all transactions started in the window
    pub conversion_rate: f64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePoint {
    pub period: String,
    pub revenue: i64,
    pub orders: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub product_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Uuid>,
    pub units: i64,
    pub orders: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: u64,
    pub by_status: BTreeMap<String, u64>,
    pub revenue: i64,
    pub discount: i64,
    pub shipping: i64,
    pub tax: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponUsage {
    pub coupon_id: Uuid,
    pub code: String,
    pub usage_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<i32>,
    pub orders: u64,
    pub discount_granted: i64,
}

/// Read-only reports over orders, transactions and coupons
#[derive(Clone)]
pub struct AnalyticsService {
    db: Arc<DatabaseConnection>,
}

impl AnalyticsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn orders_since(&self, period: Period) -> Result<Vec<order::Model>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(OrderColumn::CreatedAt.gte(period.since(Utc::now())))
            .order_by_asc(OrderColumn::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(orders)
    }

    #[instrument(skip(self))]
    pub async fn overview(&self, period: Period) -> Result<Overview, ServiceError> {
        info!(days = period.days(), "Generating analytics overview");
        let orders = self.orders_since(period).await?;
        let transactions = TransactionEntity::find()
            .filter(TransactionColumn::CreatedAt.gte(period.since(Utc::now())))
            .all(&*self.db)
            .await?;

        let mut by_status = BTreeMap::new();
        for txn in &transactions {
            *by_status.entry(txn.status.as_str().to_string()).or_insert(0) += 1;
        }
        let succeeded = transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Succeeded)
            .count();

        Ok(overview_from(period, &orders, by_status, succeeded, transactions.len()))
    }

    #[instrument(skip(self))]
    pub async fn revenue(
        &self,
        period: Period,
        group_by: GroupBy,
    ) -> Result<Vec<RevenuePoint>, ServiceError> {
        let orders = self.orders_since(period).await?;
        Ok(revenue_series(&orders, group_by))
    }

    #[instrument(skip(self))]
    pub async fn top_products(&self, period: Period) -> Result<Vec<ProductSales>, ServiceError> {
        let orders = self.orders_since(period).await?;
        Ok(product_sales(&orders, TOP_PRODUCTS))
    }

    #[instrument(skip(self))]
    pub async fn order_stats(&self, period: Period) -> Result<OrderStats, ServiceError> {
        let orders = self.orders_since(period).await?;
        Ok(order_stats(&orders))
    }

    #[instrument(skip(self))]
    pub async fn coupon_usage(&self, period: Period) -> Result<Vec<CouponUsage>, ServiceError> {
        let orders = self.orders_since(period).await?;
        let coupons = CouponEntity::find()
            .order_by_asc(CouponColumn::Code)
            .all(&*self.db)
            .await?;

        let mut per_coupon: HashMap<Uuid, (u64, i64)> = HashMap::new();
        for order in orders.iter().filter(|o| o.status.is_revenue()) {
            if let Some(coupon_id) = order.coupon_id {
                let entry = per_coupon.entry(coupon_id).or_default();
                entry.0 += 1;
                entry.1 += order.discount;
            }
        }

        Ok(coupons
            .into_iter()
            .map(|coupon| {
                let (orders, discount_granted) =
                    per_coupon.get(&coupon.id).copied().unwrap_or_default();
                CouponUsage {
                    coupon_id: coupon.id,
                    code: coupon.code,
                    usage_count: coupon.usage_count,
                    usage_limit: coupon.usage_limit,
                    orders,
                    discount_granted,
                }
            })
            .collect())
    }
}

fn overview_from(
    period: Period,
    orders: &[order::Model],
    transactions: BTreeMap<String, u64>,
    succeeded: usize,
    started: usize,
) -> Overview {
    let paid: Vec<&order::Model> = orders.iter().filter(|o| o.status.is_revenue()).collect();
    let revenue: i64 = paid.iter().map(|o| o.total).sum();
    let order_count = paid.len() as u64;

    let customers: HashSet<String> = paid
        .iter()
        .filter_map(|o| {
            o.customer_id
                .map(|id| id.to_string())
                .or_else(|| o.guest_email.clone())
        })
        .collect();

    Overview {
        period_days: period.days(),
        revenue,
        order_count,
        average_order_value: if order_count > 0 {
            revenue / order_count as i64
        } else {
            0
        },
        customers: customers.len() as u64,
        transactions,
        conversion_rate: if started > 0 {
            succeeded as f64 / started as f64
        } else {
            0.0
        },
        generated_at: Utc::now(),
    }
}

fn revenue_series(orders: &[order::Model], group_by: GroupBy) -> Vec<RevenuePoint> {
    let mut buckets: BTreeMap<String, (i64, u64)> = BTreeMap::new();
    for order in orders.iter().filter(|o| o.status.is_revenue()) {
        let key = order.created_at.format(group_by.format()).to_string();
        let bucket = buckets.entry(key).or_default();
        bucket.0 += order.total;
        bucket.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(period, (revenue, orders))| RevenuePoint {
            period,
            revenue,
            orders,
        })
        .collect()
}

fn product_sales(orders: &[order::Model], limit: usize) -> Vec<ProductSales> {
    let mut totals: HashMap<(Uuid, Option<Uuid>), (i64, u64)> = HashMap::new();
    for order in orders.iter().filter(|o| o.status.is_revenue()) {
        for item in order.items.0.iter() {
            let entry = totals.entry((item.product_id, item.variant_id)).or_default();
            entry.0 += i64::from(item.quantity);
            entry.1 += 1;
        }
    }

    let mut sales: Vec<ProductSales> = totals
        .into_iter()
        .map(|((product_id, variant_id), (units, orders))| ProductSales {
            product_id,
            variant_id,
            units,
            orders,
        })
        .collect();
    sales.sort_by(|a, b| {
        b.units
            .cmp(&a.units)
            .then_with(|| a.product_id.cmp(&b.product_id))
            .then_with(|| a.variant_id.cmp(&b.variant_id))
    });
    sales.truncate(limit);
    sales
}

fn order_stats(orders: &[order::Model]) -> OrderStats {
    let mut by_status = BTreeMap::new();
    for order in orders {
        *by_status.entry(order.status.as_str().to_string()).or_insert(0) += 1;
    }

    let paid = orders.iter().filter(|o| o.status.is_revenue());
    let (revenue, discount, shipping, tax) = paid.fold((0, 0, 0, 0), |acc, o| {
        (
            acc.0 + o.total,
            acc.1 + o.discount,
            acc.2 + o.shipping_fee,
            acc.3 + o.tax,
        )
    });

    OrderStats {
        total_orders: orders.len() as u64,
        by_status,
        revenue,
        discount,
        shipping,
        tax,
    }
}
