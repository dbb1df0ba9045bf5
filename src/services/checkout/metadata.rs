//! The checkout snapshot attached to gateway transactions.
//!
//! Confirmation builds the order from this snapshot as returned by the
//! gateway, never from the live cart.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::documents::{Address, LineItemSnapshot};
use crate::errors::ServiceError;
use crate::services::fees::FeeBreakdown;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutMetadata {
    pub cart_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Address>,
    pub items: Vec<LineItemSnapshot>,
    pub breakdown: FeeBreakdown,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_email: Option<String>,
}

impl CheckoutMetadata {
    pub fn to_value(&self) -> Result<serde_json::Value, ServiceError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decodes the gateway's copy. Missing or malformed metadata is fatal.
    pub fn from_gateway(raw: Option<serde_json::Value>) -> Result<Self, ServiceError> {
        let raw = raw.ok_or_else(|| {
            ServiceError::InternalError("Gateway transaction carried no checkout metadata".into())
        })?;
        let metadata: CheckoutMetadata = serde_json::from_value(raw).map_err(|e| {
            ServiceError::InternalError(format!("Malformed checkout metadata: {}", e))
        })?;

        if metadata.items.is_empty() {
            return Err(ServiceError::InternalError(
                "Checkout metadata has no line items".into(),
            ));
        }
        if metadata.items.iter().any(|item| item.quantity < 1) {
            return Err(ServiceError::InternalError(
                "Checkout metadata has a non-positive quantity".into(),
            ));
        }
        let b = &metadata.breakdown;
        if b.subtotal - b.discount + b.shipping_fee + b.tax != b.total {
            return Err(ServiceError::InternalError(
                "Checkout metadata breakdown does not add up".into(),
            ));
        }
        Ok(metadata)
    }
}
