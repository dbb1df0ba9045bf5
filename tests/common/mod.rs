#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{HeaderMap, Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use sha2::Sha512;
use storefront_api::{
    auth::ADMIN_ROLE,
    config::AppConfig,
    db,
    entities::{
        coupon,
        documents::{PriceMap, RegionRule, UuidList},
        order, product, product_variant, transaction,
    },
    events, migrator,
    services::{
        coupons::NewCoupon,
        fees::ShippingConfig,
        gateway::{
            paystack::{PaystackConfig, SIGNATURE_HEADER},
            GatewayCustomer, GatewayError, GatewayPaymentStatus, InitializeRequest,
            InitializedTransaction, PaymentGateway, PaystackGateway, VerifiedTransaction,
            WebhookEvent,
        },
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "sk_test_fake_gateway_secret";

#[derive(Debug, Clone)]
struct Initialized {
    amount: i64,
    currency: String,
    metadata: Value,
}

/// In-process stand-in for Paystack. Remembers what was initialized and
/// reports whatever status the test scripts.
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, Initialized>>,
    status: Mutex<GatewayPaymentStatus>,
    amount_override: Mutex<Option<i64>>,
    webhooks: PaystackGateway,
}

impl FakeGateway {
    pub fn new() -> Self {
        let webhooks = PaystackGateway::new(PaystackConfig {
            secret_key: WEBHOOK_SECRET.to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            callback_url: None,
        })
        .expect("paystack client for webhook verification");
        Self {
            sessions: Mutex::new(HashMap::new()),
            status: Mutex::new(GatewayPaymentStatus::Success),
            amount_override: Mutex::new(None),
            webhooks,
        }
    }

    pub fn set_status(&self, status: GatewayPaymentStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Makes verification report a different amount than was initialized.
    pub fn report_amount(&self, amount: i64) {
        *self.amount_override.lock().unwrap() = Some(amount);
    }

    pub fn initialized_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn metadata_for(&self, reference: &str) -> Option<Value> {
        self.sessions
            .lock()
            .unwrap()
            .get(reference)
            .map(|s| s.metadata.clone())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &str {
        "paystack"
    }

    async fn resolve_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError> {
        Ok(GatewayCustomer {
            id: format!("CUS_{}", email),
            email: email.to_string(),
        })
    }

    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction, GatewayError> {
        self.sessions.lock().unwrap().insert(
            request.reference.clone(),
            Initialized {
                amount: request.amount,
                currency: request.currency.clone(),
                metadata: request.metadata.clone(),
            },
        );
        Ok(InitializedTransaction {
            reference: request.reference.clone(),
            access_code: format!("AC_{}", request.reference),
            authorization_url: format!("https://checkout.example/{}", request.reference),
        })
    }

    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<VerifiedTransaction, GatewayError> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                message: "Transaction reference not found".into(),
            })?;
        let amount = self.amount_override.lock().unwrap().unwrap_or(session.amount);
        Ok(VerifiedTransaction {
            reference: reference.to_string(),
            status: self.status.lock().unwrap().clone(),
            amount,
            currency: session.currency,
            metadata: Some(session.metadata),
        })
    }

    fn verify_webhook_signature(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), GatewayError> {
        self.webhooks.verify_webhook_signature(headers, body)
    }

    fn parse_webhook_event(&self, body: &[u8]) -> Result<WebhookEvent, GatewayError> {
        self.webhooks.parse_webhook_event(body)
    }
}

/// Hex HMAC-SHA512 signature the fake gateway accepts.
pub fn sign_webhook(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application after letting the caller tweak the config.
    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        configure(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        migrator::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::new());
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            vec![gateway.clone() as Arc<dyn PaymentGateway>],
        );
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    /// Send a request against the router with optional bearer token and extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw webhook body, signed unless `signature` is given.
    pub async fn post_webhook(&self, body: &Value, signature: Option<&str>) -> Response {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = signature
            .map(str::to_string)
            .unwrap_or_else(|| sign_webhook(&raw));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/paystack/webhook")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(raw))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub fn customer_token(&self, user_id: Uuid, email: &str) -> String {
        self.state
            .auth
            .issue_token(user_id, Some(email.to_string()), vec![], Duration::hours(1))
            .unwrap()
    }

    pub fn admin_token(&self) -> String {
        self.state
            .auth
            .issue_token(
                Uuid::new_v4(),
                Some("admin@example.com".into()),
                vec![ADMIN_ROLE.to_string()],
                Duration::hours(1),
            )
            .unwrap()
    }

    pub async fn seed_product(&self, name: &str, ngn_price: i64, inventory: i32) -> product::Model {
        self.seed_product_with(name, PriceMap::default().with("NGN", ngn_price), inventory, vec![])
            .await
    }

    pub async fn seed_product_with(
        &self,
        name: &str,
        prices: PriceMap,
        inventory: i32,
        category_ids: Vec<Uuid>,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            prices: Set(prices),
            category_ids: Set(UuidList(category_ids)),
            inventory: Set(inventory),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        name: &str,
        ngn_price: Option<i64>,
        inventory: i32,
    ) -> product_variant::Model {
        let now = Utc::now();
        let prices = match ngn_price {
            Some(price) => PriceMap::default().with("NGN", price),
            None => PriceMap::default(),
        };
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            name: Set(name.to_string()),
            prices: Set(prices),
            inventory: Set(inventory),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed variant")
    }

    pub async fn seed_coupon(&self, input: NewCoupon) -> coupon::Model {
        self.state
            .services
            .coupons
            .create_coupon(input)
            .await
            .expect("seed coupon")
    }

    /// Lagos: flat 500, free from 20000; 7.5% tax
    pub async fn seed_lagos_shipping(&self) {
        self.state
            .services
            .shipping
            .save(ShippingConfig {
                base_fee: 1_500,
                free_shipping_threshold: None,
                tax_rate: Decimal::new(75, 1),
                region_rules: vec![RegionRule {
                    region: "Lagos".into(),
                    fee: 500,
                    free_shipping_threshold: Some(20_000),
                }],
            })
            .await
            .expect("seed shipping settings");
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("product exists")
    }

    pub async fn variant(&self, id: Uuid) -> product_variant::Model {
        product_variant::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("variant exists")
    }

    pub async fn coupon(&self, id: Uuid) -> coupon::Model {
        coupon::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("coupon exists")
    }

    pub async fn orders(&self) -> Vec<order::Model> {
        order::Entity::find().all(&*self.state.db).await.unwrap()
    }

    pub async fn transactions(&self) -> Vec<transaction::Model> {
        transaction::Entity::find().all(&*self.state.db).await.unwrap()
    }

    /// Creates a cart and adds `(product, variant, quantity)` lines. Returns
    /// the cart id and, for guests, the cart secret.
    pub async fn cart_with(
        &self,
        token: Option<&str>,
        lines: &[(Uuid, Option<Uuid>, i32)],
    ) -> (String, Option<String>) {
        let created = self
            .request(
                Method::POST,
                "/api/v1/carts",
                Some(serde_json::json!({ "currency": "NGN" })),
                token,
                &[],
            )
            .await;
        assert_eq!(created.status(), 201);
        let body = response_json(created).await;
        let cart_id = body["data"]["id"].as_str().unwrap().to_string();
        let secret = body["data"]["cartSecret"].as_str().map(str::to_string);

        for (product_id, variant_id, quantity) in lines {
            let headers: Vec<(&str, &str)> = secret
                .as_deref()
                .map(|s| vec![("x-cart-secret", s)])
                .unwrap_or_default();
            let response = self
                .request(
                    Method::POST,
                    &format!("/api/v1/carts/{}/items", cart_id),
                    Some(serde_json::json!({
                        "productId": product_id,
                        "variantId": variant_id,
                        "quantity": quantity,
                    })),
                    token,
                    &headers,
                )
                .await;
            assert_eq!(response.status(), 200, "adding item to cart");
        }

        (cart_id, secret)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
