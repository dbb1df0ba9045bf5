use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::AdminUser,
    errors::ServiceError,
    services::analytics::{
        CouponUsage, GroupBy, OrderStats, Overview, Period, ProductSales, RevenuePoint,
    },
    ApiResponse, AppState,
};

/// Build the analytics Router scoped under `/api/v1/analytics`.
pub fn analytics_routes() -> Router<AppState> {
    Router::new()
        .route("/overview", get(get_overview))
        .route("/revenue", get(get_revenue))
        .route("/products", get(get_top_products))
        .route("/orders", get(get_order_stats))
        .route("/coupons", get(get_coupon_usage))
}

/// Query parameters shared by analytics endpoints
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    /// Number of days to look back (default: 30)
    #[param(minimum = 1, maximum = 365)]
    pub period: Option<i64>,
    /// `day` or `month` (revenue only, default: day)
    pub group_by: Option<String>,
}

impl AnalyticsQuery {
    fn period(&self) -> Result<Period, ServiceError> {
        Period::new(self.period)
    }

    fn group_by(&self) -> Result<GroupBy, ServiceError> {
        self.group_by
            .as_deref()
            .map(str::parse)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

/// Revenue, orders, customers and conversion for the period
#[utoipa::path(
    get,
    path = "/api/v1/analytics/overview",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Overview", body = ApiResponse<Overview>),
        (status = 400, description = "Invalid period", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "analytics"
)]
pub async fn get_overview(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<Overview>>, ServiceError> {
    let overview = state.services.analytics.overview(params.period()?).await?;
    Ok(Json(ApiResponse::success(overview)))
}

/// Revenue series grouped by day or month
#[utoipa::path(
    get,
    path = "/api/v1/analytics/revenue",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Revenue series", body = ApiResponse<Vec<RevenuePoint>>),
        (status = 400, description = "Invalid period or groupBy", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "analytics"
)]
pub async fn get_revenue(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<Vec<RevenuePoint>>>, ServiceError> {
    let series = state
        .services
        .analytics
        .revenue(params.period()?, params.group_by()?)
        .await?;
    Ok(Json(ApiResponse::success(series)))
}

/// Best selling products by units
#[utoipa::path(
    get,
    path = "/api/v1/analytics/products",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Top products", body = ApiResponse<Vec<ProductSales>>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "analytics"
)]
pub async fn get_top_products(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<Vec<ProductSales>>>, ServiceError> {
    let products = state
        .services
        .analytics
        .top_products(params.period()?)
        .await?;
    Ok(Json(ApiResponse::success(products)))
}

/// Order counts by status and money totals
#[utoipa::path(
    get,
    path = "/api/v1/analytics/orders",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Order statistics", body = ApiResponse<OrderStats>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "analytics"
)]
pub async fn get_order_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<OrderStats>>, ServiceError> {
    let stats = state
        .services
        .analytics
        .order_stats(params.period()?)
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// Coupon usage and discount granted
#[utoipa::path(
    get,
    path = "/api/v1/analytics/coupons",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Coupon usage", body = ApiResponse<Vec<CouponUsage>>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "analytics"
)]
pub async fn get_coupon_usage(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<Vec<CouponUsage>>>, ServiceError> {
    let usage = state
        .services
        .analytics
        .coupon_usage(params.period()?)
        .await?;
    Ok(Json(ApiResponse::success(usage)))
}
