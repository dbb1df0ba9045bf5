//! Payment gateway seam. Checkout talks to processors only through
//! [`PaymentGateway`]; Paystack is the one production implementation.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod paystack;

pub use paystack::PaystackGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected gateway payload: {0}")]
    Decode(String),

    #[error("webhook signature verification failed")]
    InvalidSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCustomer {
    /// Gateway-specific customer identifier
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    pub metadata: serde_json::Value,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializedTransaction {
    pub reference: String,
    pub access_code: String,
    pub authorization_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    Success,
    Failed,
    /// Abandoned, ongoing, reversed, ...; carries the raw gateway status
    Other(String),
}

#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    pub reference: String,
    pub status: GatewayPaymentStatus,
    pub amount: i64,
    pub currency: String,
    /// Metadata attached at initialization, if the gateway returned any
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    ChargeSuccess { reference: String },
    Other { event: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Slug used in `/payments/{gateway}/...` routes
    fn name(&self) -> &str;

    /// Fetches the gateway customer for an email, creating one when absent.
    async fn resolve_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError>;

    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction, GatewayError>;

    async fn verify_transaction(&self, reference: &str)
        -> Result<VerifiedTransaction, GatewayError>;

    fn verify_webhook_signature(&self, headers: &HeaderMap, body: &[u8])
        -> Result<(), GatewayError>;

    /// Parses an already verified webhook body.
    fn parse_webhook_event(&self, body: &[u8]) -> Result<WebhookEvent, GatewayError>;
}
