//! Two-phase checkout: initiate a gateway payment, then confirm the order
//! once the gateway reports success.

use async_trait::async_trait;
use axum::http::HeaderMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use sea_orm::DatabaseConnection;

use crate::config::CheckoutConfig;
use crate::entities::documents::Address;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::{
    carts::CartService,
    coupons::CouponService,
    fees::FeeBreakdown,
    gateway::{GatewayError, PaymentGateway, WebhookEvent},
    shipping::ShippingService,
    Caller,
};

mod confirmer;
mod initiator;
pub mod metadata;

pub use metadata::CheckoutMetadata;

/// Body of `POST /payments/{gateway}/initiate`
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    #[serde(rename = "cartID", default)]
    pub cart_id: Option<Uuid>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub coupon_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedPayment {
    pub reference: String,
    pub access_code: String,
    pub authorization_url: String,
    #[serde(rename = "transactionID")]
    pub transaction_id: Uuid,
    pub breakdown: FeeBreakdown,
}

/// Body of `POST /payments/{gateway}/confirm-order`
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOrderRequest {
    pub reference: String,
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedOrder {
    #[serde(rename = "orderID")]
    pub order_id: Uuid,
    /// True when an earlier call already created the order
    pub already_confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub event: String,
    #[serde(rename = "orderID", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
}

/// A storefront payment method. One per gateway slug.
#[async_trait]
pub trait PaymentMethod: Send + Sync {
    fn slug(&self) -> &str;

    async fn initiate_payment(
        &self,
        caller: &Caller,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatedPayment, ServiceError>;

    async fn confirm_order(
        &self,
        caller: &Caller,
        request: ConfirmOrderRequest,
    ) -> Result<ConfirmedOrder, ServiceError>;

    async fn handle_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookAck, ServiceError>;
}

/// Payment methods keyed by slug
#[derive(Clone, Default)]
pub struct PaymentRegistry {
    methods: HashMap<String, Arc<dyn PaymentMethod>>,
}

impl PaymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: Arc<dyn PaymentMethod>) {
        info!(slug = method.slug(), "Registered payment method");
        self.methods.insert(method.slug().to_string(), method);
    }

    pub fn get(&self, slug: &str) -> Result<Arc<dyn PaymentMethod>, ServiceError> {
        self.methods
            .get(slug)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Payment method {} not found", slug)))
    }

    pub fn slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.methods.keys().cloned().collect();
        slugs.sort();
        slugs
    }
}

/// Shared collaborators of the checkout flow
#[derive(Clone)]
pub struct CheckoutDeps {
    pub db: Arc<DatabaseConnection>,
    pub carts: CartService,
    pub shipping: ShippingService,
    pub coupons: CouponService,
    pub event_sender: EventSender,
    pub config: Arc<CheckoutConfig>,
}

/// Checkout through an external [`PaymentGateway`]
#[derive(Clone)]
pub struct GatewayCheckout {
    deps: CheckoutDeps,
    gateway: Arc<dyn PaymentGateway>,
}

impl GatewayCheckout {
    pub fn new(deps: CheckoutDeps, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { deps, gateway }
    }
}

/// Session email first, then the supplied one.
pub(crate) fn resolve_email(
    caller: &Caller,
    supplied: Option<&str>,
) -> Result<String, ServiceError> {
    let email = caller
        .session_email()
        .or(supplied.map(str::trim).filter(|e| !e.is_empty()))
        .ok_or_else(|| ServiceError::ValidationError("A customer email is required".into()))?;

    if !validator::validate_email(email) {
        return Err(ServiceError::ValidationError(format!(
            "Invalid customer email {}",
            email
        )));
    }
    Ok(email.to_ascii_lowercase())
}

#[async_trait]
impl PaymentMethod for GatewayCheckout {
    fn slug(&self) -> &str {
        self.gateway.name()
    }

    async fn initiate_payment(
        &self,
        caller: &Caller,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatedPayment, ServiceError> {
        self.initiate(caller, request).await
    }

    async fn confirm_order(
        &self,
        caller: &Caller,
        request: ConfirmOrderRequest,
    ) -> Result<ConfirmedOrder, ServiceError> {
        let email = resolve_email(caller, request.customer_email.as_deref())?;
        self.confirm(&request.reference, caller.user_id(), Some(email))
            .await
    }

    async fn handle_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookAck, ServiceError> {
        self.gateway
            .verify_webhook_signature(headers, body)
            .map_err(|e| match e {
                GatewayError::InvalidSignature => {
                    warn!(gateway = self.gateway.name(), "Rejected webhook with bad signature");
                    counter!("storefront_webhooks_rejected_total", 1);
                    ServiceError::Unauthorized("Invalid webhook signature".into())
                }
                other => ServiceError::PaymentGateway(other),
            })?;

        let event = self.gateway.parse_webhook_event(body).map_err(|e| {
            ServiceError::BadRequest(format!("Unreadable webhook payload: {}", e))
        })?;

        match event {
            WebhookEvent::ChargeSuccess { reference } => {
                match self.confirm(&reference, None, None).await {
                    Ok(confirmed) => Ok(WebhookAck {
                        received: true,
                        event: "charge.success".into(),
                        order_id: Some(confirmed.order_id),
                    }),
                    // Not ours, not final yet, or already closed: acknowledge so the
                    // gateway stops retrying.
                    Err(
                        err @ (ServiceError::BadRequest(_)
                        | ServiceError::PaymentFailed(_)
                        | ServiceError::InvalidOperation(_)),
                    ) => {
                        warn!(%reference, error = %err, "Webhook charge not confirmed");
                        Ok(WebhookAck {
                            received: true,
                            event: "charge.success".into(),
                            order_id: None,
                        })
                    }
                    Err(err) => Err(err),
                }
            }
            WebhookEvent::Other { event } => {
                info!(%event, "Ignoring webhook event");
                Ok(WebhookAck {
                    received: true,
                    event,
                    order_id: None,
                })
            }
        }
    }
}
