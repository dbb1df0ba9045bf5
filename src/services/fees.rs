//! Shipping, tax and order total arithmetic. Amounts are in the smallest
//! currency unit throughout.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::documents::RegionRule;

/// Shipping table plus tax rate, as stored in the shipping settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShippingConfig {
    /// Fee when the region is unset or has no rule
    pub base_fee: i64,
    /// Global free-shipping threshold; a region threshold takes precedence
    pub free_shipping_threshold: Option<i64>,
    /// Percent
    pub tax_rate: Decimal,
    pub region_rules: Vec<RegionRule>,
}

impl ShippingConfig {
    fn rule_for(&self, region: Option<&str>) -> Option<&RegionRule> {
        let region = region.map(str::trim).filter(|r| !r.is_empty())?;
        self.region_rules
            .iter()
            .find(|rule| rule.region.trim().eq_ignore_ascii_case(region))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingQuote {
    pub fee: i64,
    pub is_free: bool,
}

pub fn calculate_shipping_fee(
    region: Option<&str>,
    subtotal: i64,
    config: &ShippingConfig,
) -> ShippingQuote {
    let rule = config.rule_for(region);
    let threshold = rule
        .and_then(|r| r.free_shipping_threshold)
        .or(config.free_shipping_threshold);

    if threshold.is_some_and(|t| subtotal >= t) {
        return ShippingQuote {
            fee: 0,
            is_free: true,
        };
    }

    ShippingQuote {
        fee: rule.map_or(config.base_fee, |r| r.fee).max(0),
        is_free: false,
    }
}

/// `floor(amount * rate / 100)`, never negative.
pub fn calculate_tax(amount: i64, rate_percent: Decimal) -> i64 {
    if amount <= 0 || rate_percent <= Decimal::ZERO {
        return 0;
    }
    (Decimal::from(amount) * rate_percent / Decimal::ONE_HUNDRED)
        .floor()
        .to_i64()
        .unwrap_or(0)
        .max(0)
}

/// Totals shown to the customer and attached to the gateway transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub tax: i64,
    pub discount: i64,
    pub total: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<Uuid>,
}

impl FeeBreakdown {
    /// Tax applies to the discounted subtotal; shipping is added untaxed.
    pub fn compute(
        subtotal: i64,
        discount: i64,
        shipping: ShippingQuote,
        tax_rate: Decimal,
        coupon_id: Option<Uuid>,
    ) -> Self {
        let discount = discount.clamp(0, subtotal.max(0));
        let taxable = subtotal - discount;
        let tax = calculate_tax(taxable, tax_rate);
        Self {
            subtotal,
            shipping_fee: shipping.fee,
            tax,
            discount,
            total: taxable + shipping.fee + tax,
            coupon_id,
        }
    }
}
