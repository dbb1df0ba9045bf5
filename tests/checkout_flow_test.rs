//! End-to-end checkout: cart -> initiate payment -> confirm order.

mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::entities::transaction::TransactionStatus;
use storefront_api::services::coupons::NewCoupon;
use storefront_api::services::gateway::GatewayPaymentStatus;
use uuid::Uuid;

fn lagos() -> Value {
    json!({ "name": "Ada Obi", "line1": "1 Marina", "city": "Lagos", "state": "Lagos", "country": "NG" })
}

async fn initiate(
    app: &TestApp,
    token: Option<&str>,
    secret: Option<&str>,
    payload: Value,
) -> axum::response::Response {
    let headers: Vec<(&str, &str)> = secret.map(|s| vec![("x-cart-secret", s)]).unwrap_or_default();
    app.request(
        Method::POST,
        "/api/v1/payments/paystack/initiate",
        Some(payload),
        token,
        &headers,
    )
    .await
}

async fn confirm(app: &TestApp, token: Option<&str>, payload: Value) -> axum::response::Response {
    app.request(
        Method::POST,
        "/api/v1/payments/paystack/confirm-order",
        Some(payload),
        token,
        &[],
    )
    .await
}

#[tokio::test]
async fn guest_checkout_without_coupon_totals_11250() {
    let app = TestApp::new().await;
    app.seed_lagos_shipping().await;
    let product = app.seed_product("Sneaker", 10_000, 5).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;
    let secret = secret.expect("guest carts get a secret");

    let response = initiate(
        &app,
        None,
        Some(&secret),
        json!({ "cartID": cart_id, "customerEmail": "Guest@Example.com", "shippingAddress": lagos() }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;

    assert_eq!(body["breakdown"]["subtotal"], 10_000);
    assert_eq!(body["breakdown"]["shippingFee"], 500);
    assert_eq!(body["breakdown"]["tax"], 750);
    assert_eq!(body["breakdown"]["discount"], 0);
    assert_eq!(body["breakdown"]["total"], 11_250);
    assert!(body["accessCode"].as_str().unwrap().starts_with("AC_"));

    let reference = body["reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("sf_"));

    let transactions = app.transactions().await;
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].status, TransactionStatus::Pending);
    assert_eq!(transactions[0].amount, 11_250);
    assert_eq!(transactions[0].guest_email.as_deref(), Some("guest@example.com"));

    let confirmed = confirm(
        &app,
        None,
        json!({ "reference": reference, "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(confirmed.status(), StatusCode::OK);
    let confirmed = response_json(confirmed).await;
    assert_eq!(confirmed["alreadyConfirmed"], false);

    let orders = app.orders().await;
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.id.to_string(), confirmed["orderID"].as_str().unwrap());
    assert_eq!(order.total, 11_250);
    assert_eq!(order.shipping_fee, 500);
    assert_eq!(order.tax, 750);
    assert_eq!(order.guest_email.as_deref(), Some("guest@example.com"));
    assert!(order.customer_id.is_none());

    let transactions = app.transactions().await;
    assert_eq!(transactions[0].status, TransactionStatus::Succeeded);
    assert_eq!(transactions[0].order_id, Some(order.id));
}

#[tokio::test]
async fn capped_percentage_coupon_totals_10390() {
    let app = TestApp::new().await;
    app.seed_lagos_shipping().await;
    let product = app.seed_product("Sneaker", 10_000, 5).await;
    let coupon = app
        .seed_coupon(NewCoupon {
            max_discount_amount: Some(800),
            ..NewCoupon::percentage("save10", dec!(10))
        })
        .await;

    let user = Uuid::new_v4();
    let token = app.customer_token(user, "ada@example.com");
    let (cart_id, _) = app.cart_with(Some(&token), &[(product.id, None, 1)]).await;

    let response = initiate(
        &app,
        Some(&token),
        None,
        json!({ "cartID": cart_id, "shippingAddress": lagos(), "couponId": coupon.id }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["breakdown"]["discount"], 800);
    assert_eq!(body["breakdown"]["shippingFee"], 500);
    assert_eq!(body["breakdown"]["tax"], 690);
    assert_eq!(body["breakdown"]["total"], 10_390);
    assert_eq!(body["breakdown"]["couponId"], coupon.id.to_string());

    let reference = body["reference"].as_str().unwrap();
    let confirmed = confirm(&app, Some(&token), json!({ "reference": reference })).await;
    assert_eq!(confirmed.status(), StatusCode::OK);

    let order = &app.orders().await[0];
    assert_eq!(order.discount, 800);
    assert_eq!(order.total, 10_390);
    assert_eq!(order.customer_id, Some(user));
    assert_eq!(order.coupon_id, Some(coupon.id));

    // Usage is only counted once the payment is confirmed
    let coupon = app.coupon(coupon.id).await;
    assert_eq!(coupon.usage_count, 1);
    assert!(coupon.used_by.contains(&user));
}

#[tokio::test]
async fn confirming_twice_creates_one_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Hat", 4_000, 10).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 2)]).await;

    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
        )
        .await,
    )
    .await;
    let reference = body["reference"].as_str().unwrap();
    let payload = json!({ "reference": reference, "customerEmail": "guest@example.com" });

    let first = response_json(confirm(&app, None, payload.clone()).await).await;
    let second = confirm(&app, None, payload).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second = response_json(second).await;

    assert_eq!(first["orderID"], second["orderID"]);
    assert_eq!(second["alreadyConfirmed"], true);
    assert_eq!(app.orders().await.len(), 1);
    // Stock moved once
    assert_eq!(app.product(product.id).await.inventory, 8);
}

#[tokio::test]
async fn order_reflects_snapshot_not_later_cart_edits() {
    let app = TestApp::new().await;
    let shoe = app.seed_product("Shoe", 3_000, 10).await;
    let sock = app.seed_product("Sock", 500, 10).await;
    let user = Uuid::new_v4();
    let token = app.customer_token(user, "ada@example.com");
    let (cart_id, _) = app.cart_with(Some(&token), &[(shoe.id, None, 1)]).await;

    let body = response_json(
        initiate(&app, Some(&token), None, json!({ "cartID": cart_id })).await,
    )
    .await;
    let reference = body["reference"].as_str().unwrap().to_string();

    // Edit the cart while the customer is on the payment page
    let added = app
        .request(
            Method::POST,
            &format!("/api/v1/carts/{}/items", cart_id),
            Some(json!({ "productId": sock.id, "quantity": 3 })),
            Some(&token),
            &[],
        )
        .await;
    assert_eq!(added.status(), StatusCode::OK);

    let confirmed = confirm(&app, Some(&token), json!({ "reference": reference })).await;
    assert_eq!(confirmed.status(), StatusCode::OK);

    let order = &app.orders().await[0];
    assert_eq!(order.items.0.len(), 1);
    assert_eq!(order.items.0[0].product_id, shoe.id);
    assert_eq!(order.items.0[0].quantity, 1);
    assert_eq!(order.subtotal, 3_000);
    assert_eq!(app.product(sock.id).await.inventory, 10);

    // The cart is now closed to edits
    let late = app
        .request(
            Method::POST,
            &format!("/api/v1/carts/{}/items", cart_id),
            Some(json!({ "productId": sock.id, "quantity": 1 })),
            Some(&token),
            &[],
        )
        .await;
    assert_eq!(late.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_reference_creates_no_order() {
    let app = TestApp::new().await;
    let response = confirm(
        &app,
        None,
        json!({ "reference": "sf_does_not_exist", "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("No transaction found"));
    assert!(app.orders().await.is_empty());
}

#[tokio::test]
async fn out_of_stock_blocks_initiation() {
    let app = TestApp::new().await;
    let product = app.seed_product("Limited", 2_000, 1).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 2)]).await;

    let response = initiate(
        &app,
        None,
        secret.as_deref(),
        json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["cause"], "OutOfStock");

    assert!(app.transactions().await.is_empty());
    assert_eq!(app.gateway.initialized_count(), 0);
}

#[tokio::test]
async fn variant_stock_is_checked_and_decremented() {
    let app = TestApp::new().await;
    let product = app.seed_product("Tee", 2_500, 100).await;
    let large = app.seed_variant(product.id, "L", None, 3).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, Some(large.id), 2)]).await;

    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
        )
        .await,
    )
    .await;
    // The variant inherits the product price
    assert_eq!(body["breakdown"]["subtotal"], 5_000);
    assert_eq!(app.variant(large.id).await.inventory, 3);

    let reference = body["reference"].as_str().unwrap();
    let confirmed = confirm(
        &app,
        None,
        json!({ "reference": reference, "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(confirmed.status(), StatusCode::OK);

    assert_eq!(app.variant(large.id).await.inventory, 1);
    assert_eq!(app.product(product.id).await.inventory, 100);
}

#[tokio::test]
async fn stock_sold_elsewhere_does_not_void_paid_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Last one", 2_000, 1).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;
    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
        )
        .await,
    )
    .await;

    // Someone else took the stock after initiation
    use sea_orm::{ActiveModelTrait, Set};
    let mut sold: storefront_api::entities::product::ActiveModel =
        app.product(product.id).await.into();
    sold.inventory = Set(0);
    sold.update(&*app.state.db).await.unwrap();

    let confirmed = confirm(
        &app,
        None,
        json!({ "reference": body["reference"], "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(confirmed.status(), StatusCode::OK);
    assert_eq!(app.orders().await.len(), 1);
    assert_eq!(app.product(product.id).await.inventory, 0);
}

#[tokio::test]
async fn strict_coupons_fail_checkout_with_coupon_cause() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let expired = app
        .seed_coupon(NewCoupon {
            valid_until: Some(Utc::now() - Duration::days(1)),
            ..NewCoupon::percentage("OLD10", dec!(10))
        })
        .await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;

    let response = initiate(
        &app,
        None,
        secret.as_deref(),
        json!({ "cartID": cart_id, "customerEmail": "guest@example.com", "couponId": expired.id }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["cause"], "CouponInvalid");
    assert!(app.transactions().await.is_empty());
}

#[tokio::test]
async fn lenient_coupons_continue_without_discount() {
    let app = TestApp::with_config(|cfg| cfg.checkout.strict_coupons = false).await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let expired = app
        .seed_coupon(NewCoupon {
            valid_until: Some(Utc::now() - Duration::days(1)),
            ..NewCoupon::percentage("OLD10", dec!(10))
        })
        .await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;

    let response = initiate(
        &app,
        None,
        secret.as_deref(),
        json!({ "cartID": cart_id, "customerEmail": "guest@example.com", "couponId": expired.id }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["breakdown"]["discount"], 0);
    assert!(body["breakdown"]["couponId"].is_null());
}

#[tokio::test]
async fn guest_redemptions_are_not_counted() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let coupon = app.seed_coupon(NewCoupon::fixed("FLAT1K", 1_000)).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;

    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com", "couponId": coupon.id }),
        )
        .await,
    )
    .await;
    assert_eq!(body["breakdown"]["discount"], 1_000);

    let confirmed = confirm(
        &app,
        None,
        json!({ "reference": body["reference"], "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(confirmed.status(), StatusCode::OK);

    let coupon = app.coupon(coupon.id).await;
    assert_eq!(coupon.usage_count, 0);
    assert!(coupon.used_by.is_empty());
    assert_eq!(app.orders().await[0].discount, 1_000);
}

#[tokio::test]
async fn failed_payment_marks_transaction_failed() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;
    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
        )
        .await,
    )
    .await;

    app.gateway.set_status(GatewayPaymentStatus::Failed);
    let response = confirm(
        &app,
        None,
        json!({ "reference": body["reference"], "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["cause"], "PaymentNotCompleted");

    assert_eq!(app.transactions().await[0].status, TransactionStatus::Failed);
    assert!(app.orders().await.is_empty());
    assert_eq!(app.product(product.id).await.inventory, 5);
}

#[tokio::test]
async fn abandoned_payment_stays_pending() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;
    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
        )
        .await,
    )
    .await;

    app.gateway
        .set_status(GatewayPaymentStatus::Other("abandoned".into()));
    let response = confirm(
        &app,
        None,
        json!({ "reference": body["reference"], "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.transactions().await[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn amount_mismatch_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;
    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
        )
        .await,
    )
    .await;

    app.gateway.report_amount(100);
    let response = confirm(
        &app,
        None,
        json!({ "reference": body["reference"], "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.orders().await.is_empty());
    assert_eq!(app.transactions().await[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn guest_cart_requires_its_secret_at_checkout() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let (cart_id, _) = app.cart_with(None, &[(product.id, None, 1)]).await;

    let response = initiate(
        &app,
        None,
        Some("wrong-secret"),
        json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn guest_needs_an_email() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;

    let response = initiate(&app, None, secret.as_deref(), json!({ "cartID": cart_id })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_in_customer_defaults_to_latest_open_cart() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let token = app.customer_token(Uuid::new_v4(), "ada@example.com");
    let (cart_id, _) = app.cart_with(Some(&token), &[(product.id, None, 1)]).await;

    let response = initiate(&app, Some(&token), None, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let metadata = app
        .gateway
        .metadata_for(body["reference"].as_str().unwrap())
        .unwrap();
    assert_eq!(metadata["cartId"], cart_id);
}

#[tokio::test]
async fn unknown_gateway_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/stripe/initiate",
            Some(json!({})),
            None,
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .post_webhook(
            &json!({ "event": "charge.success", "data": { "reference": "sf_x" } }),
            Some("deadbeef"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_confirms_order_and_redelivery_is_safe() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;
    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
        )
        .await,
    )
    .await;

    let event = json!({ "event": "charge.success", "data": { "reference": body["reference"] } });
    let first = app.post_webhook(&event, None).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = response_json(first).await;
    assert_eq!(first["received"], true);

    let again = response_json(app.post_webhook(&event, None).await).await;
    assert_eq!(first["orderID"], again["orderID"]);

    let orders = app.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].guest_email.as_deref(), Some("guest@example.com"));
}

#[tokio::test]
async fn webhook_for_unknown_reference_is_acknowledged() {
    let app = TestApp::new().await;
    let response = app
        .post_webhook(
            &json!({ "event": "charge.success", "data": { "reference": "sf_unknown" } }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert!(body.get("orderID").is_none());
}

#[tokio::test]
async fn other_webhook_events_are_ignored() {
    let app = TestApp::new().await;
    let response = app
        .post_webhook(&json!({ "event": "transfer.success", "data": {} }), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["event"], "transfer.success");
}

#[tokio::test]
async fn confirmation_keeps_the_initiating_customer() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let alice_id = Uuid::new_v4();
    let alice = app.customer_token(alice_id, "alice@example.com");
    let bob = app.customer_token(Uuid::new_v4(), "bob@example.com");
    let (cart_id, _) = app.cart_with(Some(&alice), &[(product.id, None, 1)]).await;

    let body = response_json(initiate(&app, Some(&alice), None, json!({ "cartID": cart_id })).await)
        .await;
    let reference = body["reference"].clone();

    let hijack = confirm(&app, Some(&bob), json!({ "reference": reference })).await;
    assert_eq!(hijack.status(), StatusCode::FORBIDDEN);
    assert!(app.orders().await.is_empty());
    assert_eq!(app.transactions().await[0].status, TransactionStatus::Pending);

    let confirmed = confirm(&app, Some(&alice), json!({ "reference": reference })).await;
    assert_eq!(confirmed.status(), StatusCode::OK);
    let orders = app.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].customer_id, Some(alice_id));
    assert!(orders[0].guest_email.is_none());
}

#[tokio::test]
async fn webhook_confirmation_assigns_the_initiating_customer() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let alice_id = Uuid::new_v4();
    let alice = app.customer_token(alice_id, "alice@example.com");
    let (cart_id, _) = app.cart_with(Some(&alice), &[(product.id, None, 1)]).await;

    let body = response_json(initiate(&app, Some(&alice), None, json!({ "cartID": cart_id })).await)
        .await;
    let event = json!({ "event": "charge.success", "data": { "reference": body["reference"] } });
    assert_eq!(app.post_webhook(&event, None).await.status(), StatusCode::OK);

    assert_eq!(app.orders().await[0].customer_id, Some(alice_id));
}

#[tokio::test]
async fn coupon_limit_overrun_still_places_the_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let coupon = app
        .seed_coupon(NewCoupon {
            usage_limit: Some(1),
            ..NewCoupon::fixed("ONCE", 500)
        })
        .await;

    // Both checkouts pass validation before either redemption is recorded.
    let mut references = Vec::new();
    for email in ["ada@example.com", "bola@example.com"] {
        let token = app.customer_token(Uuid::new_v4(), email);
        let (cart_id, _) = app.cart_with(Some(&token), &[(product.id, None, 1)]).await;
        let body = response_json(
            initiate(
                &app,
                Some(&token),
                None,
                json!({ "cartID": cart_id, "couponId": coupon.id }),
            )
            .await,
        )
        .await;
        assert_eq!(body["breakdown"]["discount"], 500);
        references.push((token, body["reference"].clone()));
    }

    for (token, reference) in &references {
        let confirmed = confirm(&app, Some(token), json!({ "reference": reference })).await;
        assert_eq!(confirmed.status(), StatusCode::OK);
    }

    let orders = app.orders().await;
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|order| order.discount == 500));

    let coupon = app.coupon(coupon.id).await;
    assert_eq!(coupon.usage_count, 1);
    assert_eq!(coupon.used_by.0.len(), 2);
}

#[tokio::test]
async fn price_removed_after_add_to_cart_blocks_initiation() {
    use sea_orm::{ActiveModelTrait, Set};
    use storefront_api::entities::{documents::PriceMap, product};

    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;

    let mut repriced: product::ActiveModel = product.clone().into();
    repriced.prices = Set(PriceMap::default().with("USD", 2_500));
    repriced.update(&*app.state.db).await.unwrap();

    let response = initiate(
        &app,
        None,
        secret.as_deref(),
        json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["cause"], "MissingPrice");
    assert!(app.transactions().await.is_empty());
    assert_eq!(app.gateway.initialized_count(), 0);
}

#[tokio::test]
async fn webhook_for_a_failed_transaction_is_acknowledged() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bag", 10_000, 5).await;
    let (cart_id, secret) = app.cart_with(None, &[(product.id, None, 1)]).await;
    let body = response_json(
        initiate(
            &app,
            None,
            secret.as_deref(),
            json!({ "cartID": cart_id, "customerEmail": "guest@example.com" }),
        )
        .await,
    )
    .await;

    app.gateway.set_status(GatewayPaymentStatus::Failed);
    let failed = confirm(
        &app,
        None,
        json!({ "reference": body["reference"], "customerEmail": "guest@example.com" }),
    )
    .await;
    assert_eq!(failed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.transactions().await[0].status, TransactionStatus::Failed);

    // A late success event for a closed transaction must not be retried forever.
    app.gateway.set_status(GatewayPaymentStatus::Success);
    let event = json!({ "event": "charge.success", "data": { "reference": body["reference"] } });
    let response = app.post_webhook(&event, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response_json(response).await.get("orderID").is_none());
    assert!(app.orders().await.is_empty());
}
