use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha512;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{
    GatewayCustomer, GatewayError, GatewayPaymentStatus, InitializeRequest,
    InitializedTransaction, PaymentGateway, VerifiedTransaction, WebhookEvent,
};
use crate::config::PaymentsConfig;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

type HmacSha512 = Hmac<Sha512>;

/// Paystack configuration
#[derive(Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
    pub callback_url: Option<String>,
}

impl PaystackConfig {
    /// `None` when no secret key is configured
    pub fn from_payments(payments: &PaymentsConfig) -> Option<Self> {
        let secret_key = payments.paystack_secret_key.clone()?;
        Some(Self {
            secret_key,
            base_url: payments.paystack_base_url.trim_end_matches('/').to_string(),
            callback_url: payments.paystack_callback_url.clone(),
        })
    }
}

/// Paystack REST client
#[derive(Clone)]
pub struct PaystackGateway {
    config: PaystackConfig,
    client: reqwest::Client,
}

/// Every Paystack response is wrapped in this envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CustomerData {
    customer_code: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct CreateCustomerBody<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    metadata: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    event: String,
    #[serde(default)]
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    reference: Option<String>,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            warn!(status = status.as_u16(), %message, "Paystack API error");
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))?;
        if !envelope.status {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: envelope.message,
            });
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::Decode("response carried no data".to_string()))
    }

    async fn fetch_customer(&self, email: &str) -> Result<Option<GatewayCustomer>, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/customer/{}", email)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let data: CustomerData = Self::read_envelope(response).await?;
        Ok(Some(GatewayCustomer {
            id: data.customer_code,
            email: data.email,
        }))
    }
}

/// Paystack returns metadata as an object, a JSON string or an empty string.
fn normalize_metadata(raw: serde_json::Value) -> Option<serde_json::Value> {
    match raw {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => serde_json::from_str(&s).ok(),
        other => Some(other),
    }
}

fn map_status(status: &str) -> GatewayPaymentStatus {
    match status {
        "success" => GatewayPaymentStatus::Success,
        "failed" => GatewayPaymentStatus::Failed,
        other => GatewayPaymentStatus::Other(other.to_string()),
    }
}

/// Checks a hex HMAC-SHA512 of `body` keyed with `secret`.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn name(&self) -> &str {
        "paystack"
    }

    #[instrument(skip(self))]
    async fn resolve_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError> {
        if let Some(customer) = self.fetch_customer(email).await? {
            return Ok(customer);
        }

        debug!("Creating Paystack customer");
        let response = self
            .client
            .post(self.url("/customer"))
            .bearer_auth(&self.config.secret_key)
            .json(&CreateCustomerBody { email })
            .send()
            .await?;
        let data: CustomerData = Self::read_envelope(response).await?;
        Ok(GatewayCustomer {
            id: data.customer_code,
            email: data.email,
        })
    }

    #[instrument(
        skip(self, request),
        fields(reference = %request.reference, amount = request.amount)
    )]
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction, GatewayError> {
        let callback_url = request
            .callback_url
            .as_deref()
            .or(self.config.callback_url.as_deref());
        let body = InitializeBody {
            email: &request.email,
            amount: request.amount,
            currency: &request.currency,
            reference: &request.reference,
            metadata: &request.metadata,
            callback_url,
        };

        let response = self
            .client
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await?;
        let data: InitializeData = Self::read_envelope(response).await?;

        Ok(InitializedTransaction {
            reference: data.reference,
            access_code: data.access_code,
            authorization_url: data.authorization_url,
        })
    }

    #[instrument(skip(self))]
    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<VerifiedTransaction, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/transaction/verify/{}", reference)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;
        let data: VerifyData = Self::read_envelope(response).await?;

        Ok(VerifiedTransaction {
            reference: data.reference,
            status: map_status(&data.status),
            amount: data.amount,
            currency: data.currency.to_ascii_uppercase(),
            metadata: normalize_metadata(data.metadata),
        })
    }

    fn verify_webhook_signature(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), GatewayError> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::InvalidSignature)?;

        if verify_signature(&self.config.secret_key, body, signature) {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature)
        }
    }

    fn parse_webhook_event(&self, body: &[u8]) -> Result<WebhookEvent, GatewayError> {
        let payload: WebhookBody =
            serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

        match (payload.event.as_str(), payload.data.and_then(|d| d.reference)) {
            ("charge.success", Some(reference)) => Ok(WebhookEvent::ChargeSuccess { reference }),
            ("charge.success", None) => Err(GatewayError::Decode(
                "charge.success event without a reference".to_string(),
            )),
            _ => Ok(WebhookEvent::Other {
                event: payload.event,
            }),
        }
    }
}
