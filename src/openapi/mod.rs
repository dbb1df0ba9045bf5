use utoipa::OpenApi;

use crate::{
    entities::{coupon::DiscountType, documents::Address, documents::LineItemSnapshot},
    errors::ErrorResponse,
    handlers,
    services::{
        analytics::{CouponUsage, GroupBy, OrderStats, Overview, ProductSales, RevenuePoint},
        carts::{AddToCartInput, CartItemView, CartView, CreatedCart},
        checkout::{
            ConfirmOrderRequest, ConfirmedOrder, InitiatePaymentRequest, InitiatedPayment,
            WebhookAck,
        },
        coupons::{CouponSummary, CouponValidation},
        fees::FeeBreakdown,
    },
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout API

Carts, two-phase gateway checkout, coupons and admin analytics.

## Authentication

Customers send a JWT in the Authorization header. Requests without one are guests:

```
Authorization: Bearer <your-jwt-token>
```

Guest carts are unlocked with the secret returned when the cart is created:

```
x-cart-secret: <cart-secret>
```

## Money

Amounts are integers in the smallest currency unit (kobo, cents). Percentages are decimals.

## Errors

```json
{
  "error": "Bad Request",
  "message": "Insufficient stock: Sneaker has 1 left, 2 requested",
  "cause": "OutOfStock",
  "request_id": "req-abc123xyz",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

`cause` is one of `OutOfStock`, `MissingPrice`, `CouponInvalid`, `PaymentNotCompleted`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "payments", description = "Payment initiation, order confirmation and gateway webhooks"),
        (name = "carts", description = "Shopping carts"),
        (name = "coupons", description = "Coupon validation"),
        (name = "analytics", description = "Admin reports")
    ),
    paths(
        handlers::payments::initiate_payment,
        handlers::payments::confirm_order,
        handlers::payments::payment_webhook,
        handlers::carts::create_cart,
        handlers::carts::get_cart,
        handlers::carts::add_item,
        handlers::carts::update_item,
        handlers::carts::remove_item,
        handlers::coupons::validate_coupon,
        handlers::analytics::get_overview,
        handlers::analytics::get_revenue,
        handlers::analytics::get_top_products,
        handlers::analytics::get_order_stats,
        handlers::analytics::get_coupon_usage,
    ),
    components(schemas(
        ErrorResponse,
        Address,
        LineItemSnapshot,
        DiscountType,
        FeeBreakdown,
        InitiatePaymentRequest,
        InitiatedPayment,
        ConfirmOrderRequest,
        ConfirmedOrder,
        WebhookAck,
        CartView,
        CartItemView,
        CreatedCart,
        AddToCartInput,
        handlers::carts::CreateCartRequest,
        handlers::carts::UpdateQuantityRequest,
        handlers::coupons::ValidateCouponRequest,
        CouponSummary,
        CouponValidation,
        Overview,
        RevenuePoint,
        ProductSales,
        OrderStats,
        CouponUsage,
        GroupBy,
    ))
)]
pub struct ApiDocV1;
