use axum::{
    extract::{Json, State},
    http::HeaderMap,
    routing::post,
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::caller_from;
use crate::auth::OptionalUser;
use crate::handlers::AppState;
use crate::services::coupons::CouponValidation;
use crate::{ApiResponse, ApiResult};

/// Coupon routes scoped under `/api/v1/coupons`.
pub fn coupon_routes() -> Router<AppState> {
    Router::new().route("/validate", post(validate_coupon))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({"code": "SAVE10", "cartID": "550e8400-e29b-41d4-a716-446655440000"}))]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[serde(rename = "cartID")]
    pub cart_id: Uuid,
}

/// Check a coupon code against a cart without redeeming it
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Validation result; rejected codes come back with valid=false", body = ApiResponse<CouponValidation>),
        (status = 403, description = "Not the cart owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    headers: HeaderMap,
    Json(request): Json<ValidateCouponRequest>,
) -> ApiResult<CouponValidation> {
    request.validate()?;
    let caller = caller_from(user, &headers);
    let context = state
        .services
        .carts
        .coupon_context_for(request.cart_id, &caller)
        .await?;
    let result = state
        .services
        .coupons
        .validate_code(&request.code, &context, caller.user_id())
        .await?;
    Ok(Json(ApiResponse::success(result)))
}
