pub mod analytics;
pub mod carts;
pub mod coupons;
pub mod payments;

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    analytics::AnalyticsService,
    carts::CartService,
    checkout::{CheckoutDeps, GatewayCheckout, PaymentRegistry},
    coupons::CouponService,
    gateway::PaymentGateway,
    shipping::ShippingService,
    Caller,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Header carrying the guest cart secret
pub const CART_SECRET_HEADER: &str = "x-cart-secret";

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: CartService,
    pub coupons: CouponService,
    pub shipping: ShippingService,
    pub analytics: AnalyticsService,
    pub payments: PaymentRegistry,
}

impl AppServices {
    /// Wires every service and registers one payment method per gateway.
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        gateways: Vec<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let checkout = Arc::new(config.checkout.clone());
        let carts = CartService::new(db.clone(), event_sender.clone(), checkout.clone());
        let coupons = CouponService::new(db.clone());
        let shipping = ShippingService::new(db.clone(), &config.checkout);

        let deps = CheckoutDeps {
            db: db.clone(),
            carts: carts.clone(),
            shipping: shipping.clone(),
            coupons: coupons.clone(),
            event_sender,
            config: checkout,
        };

        let mut payments = PaymentRegistry::new();
        for gateway in gateways {
            payments.register(Arc::new(GatewayCheckout::new(deps.clone(), gateway)));
        }

        Self {
            carts,
            coupons,
            shipping,
            analytics: AnalyticsService::new(db),
            payments,
        }
    }
}

/// Builds the caller from the optional session and the guest cart secret.
pub fn caller_from(user: Option<crate::auth::AuthUser>, headers: &HeaderMap) -> Caller {
    let cart_secret = headers
        .get(CART_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    Caller { user, cart_secret }
}
