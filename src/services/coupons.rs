//! Coupon eligibility, discount arithmetic and redemption bookkeeping.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::coupon::{self, DiscountType, Entity as Coupon};
use crate::entities::documents::UuidList;
use crate::errors::ServiceError;

/// Why a coupon cannot be applied. The display strings are shown to shoppers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("Coupon not found")]
    NotFound,
    #[error("Coupon is not active")]
    Inactive,
    #[error("Coupon is not yet valid")]
    NotYetValid,
    #[error("Coupon has expired")]
    Expired,
    #[error("Coupon usage limit has been reached")]
    UsageLimitReached,
    #[error("You have already used this coupon the maximum number of times")]
    PerUserLimitReached,
    #[error("Minimum purchase of {currency} {} is required for this coupon", display_amount(.minimum))]
    BelowMinimumPurchase { minimum: i64, currency: String },
    #[error("Cart is empty")]
    EmptyCart,
    #[error("Coupon does not apply to any product category in your cart")]
    CategoryNotEligible,
    #[error("Coupon does not apply to any product in your cart")]
    ProductNotEligible,
}

impl From<CouponRejection> for ServiceError {
    fn from(rejection: CouponRejection) -> Self {
        ServiceError::CouponRejected(rejection.to_string())
    }
}

/// One cart line as seen by the validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponLine {
    pub product_id: Uuid,
    pub category_ids: Vec<Uuid>,
}

/// What the validator needs to know about a cart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponContext {
    pub subtotal: i64,
    pub currency: String,
    pub lines: Vec<CouponLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCoupon {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount: i64,
}

/// Discount for `subtotal`, always within `0..=subtotal`.
pub fn calculate_discount(coupon: &coupon::Model, subtotal: i64) -> i64 {
    if subtotal <= 0 {
        return 0;
    }
    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let percent = (Decimal::from(subtotal) * coupon.value / Decimal::ONE_HUNDRED)
                .floor()
                .to_i64()
                .unwrap_or(0);
            match coupon.max_discount_amount {
                Some(cap) => percent.min(cap),
                None => percent,
            }
        }
        DiscountType::Fixed => coupon
            .fixed_amount
            .unwrap_or_else(|| coupon.value.floor().to_i64().unwrap_or(0)),
    };
    raw.clamp(0, subtotal)
}

fn display_amount(minor_units: &i64) -> Decimal {
    Decimal::new(*minor_units, 2)
}

fn uses_by(used_by: &UuidList, user_id: Uuid) -> usize {
    used_by.0.iter().filter(|id| **id == user_id).count()
}

/// Runs every eligibility check in order; the first failure wins.
pub fn validate_coupon(
    coupon: &coupon::Model,
    cart: &CouponContext,
    user_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<AppliedCoupon, CouponRejection> {
    if !coupon.active {
        return Err(CouponRejection::Inactive);
    }
    if coupon.valid_from.is_some_and(|from| now < from) {
        return Err(CouponRejection::NotYetValid);
    }
    if coupon.valid_until.is_some_and(|until| now >= until) {
        return Err(CouponRejection::Expired);
    }
    if coupon
        .usage_limit
        .is_some_and(|limit| coupon.usage_count >= limit)
    {
        return Err(CouponRejection::UsageLimitReached);
    }
    if let Some(user_id) = user_id {
        let max_uses = usize::try_from(coupon.max_uses_per_user.max(0)).unwrap_or(0);
        if uses_by(&coupon.used_by, user_id) >= max_uses {
            return Err(CouponRejection::PerUserLimitReached);
        }
    }
    if let Some(minimum) = coupon.min_purchase_amount {
        if cart.subtotal < minimum {
            return Err(CouponRejection::BelowMinimumPurchase {
                minimum,
                currency: cart.currency.clone(),
            });
        }
    }
    if cart.lines.is_empty() {
        return Err(CouponRejection::EmptyCart);
    }
    if !coupon.applicable_categories.is_empty()
        && !cart.lines.iter().any(|line| {
            line.category_ids
                .iter()
                .any(|c| coupon.applicable_categories.contains(c))
        })
    {
        return Err(CouponRejection::CategoryNotEligible);
    }
    if !coupon.applicable_products.is_empty()
        && !cart
            .lines
            .iter()
            .any(|line| coupon.applicable_products.contains(&line.product_id))
    {
        return Err(CouponRejection::ProductNotEligible);
    }

    Ok(AppliedCoupon {
        coupon_id: coupon.id,
        code: coupon.code.clone(),
        discount: calculate_discount(coupon, cart.subtotal),
    })
}

/// Public view of a coupon
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponSummary {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[schema(value_type = String)]
    pub value: Decimal,
    pub max_discount_amount: Option<i64>,
}

impl From<&coupon::Model> for CouponSummary {
    fn from(model: &coupon::Model) -> Self {
        Self {
            id: model.id,
            code: model.code.clone(),
            description: model.description.clone(),
            discount_type: model.discount_type,
            value: model.value,
            max_discount_amount: model.max_discount_amount,
        }
    }
}

/// Result of `POST /coupons/validate`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponSummary>,
}

/// Input for creating a coupon
#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub fixed_amount: Option<i64>,
    pub min_purchase_amount: Option<i64>,
    pub max_discount_amount: Option<i64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub usage_limit: Option<i32>,
    pub max_uses_per_user: i32,
    pub applicable_categories: Vec<Uuid>,
    pub applicable_products: Vec<Uuid>,
}

impl NewCoupon {
    pub fn percentage(code: &str, percent: Decimal) -> Self {
        Self {
            code: code.to_string(),
            description: None,
            discount_type: DiscountType::Percentage,
            value: percent,
            fixed_amount: None,
            min_purchase_amount: None,
            max_discount_amount: None,
            valid_from: None,
            valid_until: None,
            usage_limit: None,
            max_uses_per_user: 1,
            applicable_categories: Vec::new(),
            applicable_products: Vec::new(),
        }
    }

    pub fn fixed(code: &str, amount: i64) -> Self {
        Self {
            discount_type: DiscountType::Fixed,
            value: Decimal::from(amount),
            fixed_amount: Some(amount),
            ..Self::percentage(code, Decimal::ZERO)
        }
    }
}

/// Outcome of recording a redemption at order confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionOutcome {
    Recorded,
    /// The usage limit was hit between initiation and confirmation
    LimitOverrun,
    GuestSkipped,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(Coupon::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(Coupon::find_by_id(id).one(&*self.db).await?)
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(&self, input: NewCoupon) -> Result<coupon::Model, ServiceError> {
        let code = normalize_code(&input.code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code must not be empty".to_string(),
            ));
        }
        if self.find_by_code(&code).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            value: Set(input.value),
            fixed_amount: Set(input.fixed_amount),
            min_purchase_amount: Set(input.min_purchase_amount),
            max_discount_amount: Set(input.max_discount_amount),
            valid_from: Set(input.valid_from),
            valid_until: Set(input.valid_until),
            active: Set(true),
            usage_limit: Set(input.usage_limit),
            max_uses_per_user: Set(input.max_uses_per_user),
            usage_count: Set(0),
            used_by: Set(UuidList::default()),
            applicable_categories: Set(UuidList(input.applicable_categories)),
            applicable_products: Set(UuidList(input.applicable_products)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(coupon_id = %model.id, "Coupon created");
        Ok(model)
    }

    /// Validates a code against a cart without consuming it.
    pub async fn validate_code(
        &self,
        code: &str,
        cart: &CouponContext,
        user_id: Option<Uuid>,
    ) -> Result<CouponValidation, ServiceError> {
        let Some(coupon) = self.find_by_code(code).await? else {
            return Ok(CouponValidation {
                valid: false,
                discount: None,
                error: Some(CouponRejection::NotFound.to_string()),
                coupon: None,
            });
        };

        Ok(match validate_coupon(&coupon, cart, user_id, Utc::now()) {
            Ok(applied) => CouponValidation {
                valid: true,
                discount: Some(applied.discount),
                error: None,
                coupon: Some(CouponSummary::from(&coupon)),
            },
            Err(rejection) => CouponValidation {
                valid: false,
                discount: None,
                error: Some(rejection.to_string()),
                coupon: Some(CouponSummary::from(&coupon)),
            },
        })
    }

    /// Counts one use and remembers the user. Runs on the caller's transaction.
    ///
    /// The increment only applies while `usage_count < usage_limit`; guests are
    /// not tracked at all.
    pub async fn record_redemption<C: ConnectionTrait>(
        conn: &C,
        coupon_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<RedemptionOutcome, ServiceError> {
        let Some(user_id) = user_id else {
            return Ok(RedemptionOutcome::GuestSkipped);
        };

        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsageCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await?;

        let coupon = Coupon::find_by_id(coupon_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        let mut used_by = coupon.used_by.clone();
        used_by.0.push(user_id);
        let mut active: coupon::ActiveModel = coupon.into();
        active.used_by = Set(used_by);
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;

        if result.rows_affected == 0 {
            warn!(%coupon_id, "Coupon usage limit reached before redemption was recorded");
            return Ok(RedemptionOutcome::LimitOverrun);
        }
        Ok(RedemptionOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            description: None,
            discount_type,
            value,
            fixed_amount: None,
            min_purchase_amount: None,
            max_discount_amount: None,
            valid_from: None,
            valid_until: None,
            active: true,
            usage_limit: None,
            max_uses_per_user: 1,
            usage_count: 0,
            used_by: UuidList::default(),
            applicable_categories: UuidList::default(),
            applicable_products: UuidList::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn cart(subtotal: i64) -> CouponContext {
        CouponContext {
            subtotal,
            currency: "NGN".into(),
            lines: vec![CouponLine {
                product_id: Uuid::new_v4(),
                category_ids: vec![],
            }],
        }
    }

    #[test]
    fn percentage_discount_is_floored_and_capped() {
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        assert_eq!(calculate_discount(&c, 10_005), 1_000);
        c.max_discount_amount = Some(800);
        assert_eq!(calculate_discount(&c, 10_000), 800);
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let mut c = coupon(DiscountType::Fixed, dec!(0));
        c.fixed_amount = Some(5_000);
        assert_eq!(calculate_discount(&c, 3_000), 3_000);
        assert_eq!(calculate_discount(&c, 8_000), 5_000);
    }

    #[test]
    fn fixed_discount_falls_back_to_value() {
        let c = coupon(DiscountType::Fixed, dec!(1200.9));
        assert_eq!(calculate_discount(&c, 8_000), 1_200);
    }

    #[test]
    fn window_edges_are_distinct_states() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.valid_from = Some(now + Duration::hours(1));
        c.valid_until = Some(now + Duration::hours(2));
        assert_eq!(
            validate_coupon(&c, &cart(10_000), None, now),
            Err(CouponRejection::NotYetValid)
        );

        c.valid_from = Some(now - Duration::hours(2));
        c.valid_until = Some(now);
        assert_eq!(
            validate_coupon(&c, &cart(10_000), None, now),
            Err(CouponRejection::Expired)
        );

        c.valid_until = Some(now + Duration::seconds(1));
        assert!(validate_coupon(&c, &cart(10_000), None, now).is_ok());
    }

    #[test]
    fn inactive_is_checked_before_window() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.active = false;
        c.valid_until = Some(now - Duration::days(1));
        assert_eq!(
            validate_coupon(&c, &cart(10_000), None, now),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn per_user_limit_only_applies_to_known_users() {
        let user = Uuid::new_v4();
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.used_by = UuidList(vec![user]);
        assert_eq!(
            validate_coupon(&c, &cart(10_000), Some(user), Utc::now()),
            Err(CouponRejection::PerUserLimitReached)
        );
        assert!(validate_coupon(&c, &cart(10_000), None, Utc::now()).is_ok());
        assert!(validate_coupon(&c, &cart(10_000), Some(Uuid::new_v4()), Utc::now()).is_ok());
    }

    #[test]
    fn global_limit_is_enforced() {
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.usage_limit = Some(3);
        c.usage_count = 3;
        assert_eq!(
            validate_coupon(&c, &cart(10_000), None, Utc::now()),
            Err(CouponRejection::UsageLimitReached)
        );
    }

    #[test]
    fn minimum_purchase_message_uses_display_currency() {
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.min_purchase_amount = Some(5_000);
        let err = validate_coupon(&c, &cart(4_999), None, Utc::now()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Minimum purchase of NGN 50.00 is required for this coupon"
        );
    }

    #[test]
    fn empty_cart_is_rejected() {
        let c = coupon(DiscountType::Percentage, dec!(10));
        let empty = CouponContext {
            subtotal: 0,
            currency: "NGN".into(),
            lines: vec![],
        };
        assert_eq!(
            validate_coupon(&c, &empty, None, Utc::now()),
            Err(CouponRejection::EmptyCart)
        );
    }

    #[test]
    fn allow_lists_need_one_matching_line() {
        let category = Uuid::new_v4();
        let product = Uuid::new_v4();
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.applicable_categories = UuidList(vec![category]);
        assert_eq!(
            validate_coupon(&c, &cart(10_000), None, Utc::now()),
            Err(CouponRejection::CategoryNotEligible)
        );

        let eligible = CouponContext {
            subtotal: 10_000,
            currency: "NGN".into(),
            lines: vec![
                CouponLine {
                    product_id: Uuid::new_v4(),
                    category_ids: vec![],
                },
                CouponLine {
                    product_id: product,
                    category_ids: vec![category],
                },
            ],
        };
        assert!(validate_coupon(&c, &eligible, None, Utc::now()).is_ok());

        c.applicable_products = UuidList(vec![Uuid::new_v4()]);
        assert_eq!(
            validate_coupon(&c, &eligible, None, Utc::now()),
            Err(CouponRejection::ProductNotEligible)
        );
    }

    #[test]
    fn rejection_maps_to_coupon_invalid_cause() {
        let err: ServiceError = CouponRejection::Expired.into();
        assert_matches!(err, ServiceError::CouponRejected(ref msg) if msg == "Coupon has expired");
    }
}
