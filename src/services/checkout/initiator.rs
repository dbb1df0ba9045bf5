use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, Set};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    resolve_email, CheckoutMetadata, GatewayCheckout, InitiatePaymentRequest, InitiatedPayment,
};
use crate::entities::documents::LineItems;
use crate::entities::transaction::{self, TransactionStatus};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::{
    carts::coupon_context,
    catalog,
    coupons::{validate_coupon, CouponContext, CouponRejection},
    fees::{calculate_shipping_fee, FeeBreakdown},
    gateway::InitializeRequest,
    Caller,
};

impl GatewayCheckout {
    /// Prices the cart, opens a gateway transaction and records it as pending.
    ///
    /// Nothing is written until every precondition holds; inventory is only
    /// checked here, never reserved.
    #[instrument(skip(self, caller, request), fields(gateway = %self.gateway.name()))]
    pub(super) async fn initiate(
        &self,
        caller: &Caller,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatedPayment, ServiceError> {
        let email = resolve_email(caller, request.customer_email.as_deref())?;

        let cart_id = match (request.cart_id, caller.user_id()) {
            (Some(id), _) => id,
            (None, Some(customer_id)) => self
                .deps
                .carts
                .latest_open_cart(customer_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound("No open cart found".into()))?,
            (None, None) => {
                return Err(ServiceError::ValidationError("cartID is required".into()))
            }
        };

        let cart = self.deps.carts.load_for_checkout(cart_id, caller).await?;
        if cart.cart.is_purchased() {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart {} has already been purchased",
                cart_id
            )));
        }

        let currency = cart.cart.currency.to_ascii_uppercase();
        if !self.deps.config.supports_currency(&currency) {
            return Err(ServiceError::ValidationError(format!(
                "Unsupported currency {}",
                currency
            )));
        }

        let items = cart.snapshot();
        if items.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".into()));
        }

        // Live prices and stock
        let lines = catalog::load_lines(&*self.deps.db, &items).await?;
        for line in &lines {
            line.line_total(&currency)?;
            line.ensure_in_stock()?;
        }
        let subtotal = catalog::price_lines(&lines, &currency)?;
        if subtotal <= 0 {
            return Err(ServiceError::ValidationError(
                "Cart subtotal must be greater than zero".into(),
            ));
        }

        let shipping = self.deps.shipping.current().await?;
        let region = request
            .shipping_address
            .as_ref()
            .and_then(|a| a.state.as_deref());
        let quote = calculate_shipping_fee(region, subtotal, &shipping);

        let coupon_ctx = coupon_context(&lines, subtotal, &currency);
        let (discount, coupon_id) = match request.coupon_id {
            Some(coupon_id) => self.apply_coupon(coupon_id, &coupon_ctx, caller).await?,
            None => (0, None),
        };

        let breakdown =
            FeeBreakdown::compute(subtotal, discount, quote, shipping.tax_rate, coupon_id);

        let customer = self.gateway.resolve_customer(&email).await?;

        let reference = format!(
            "{}_{}",
            self.deps.config.reference_prefix,
            Uuid::new_v4().simple()
        );
        let customer_id = caller.user_id();
        let guest_email = customer_id.is_none().then(|| email.clone());
        let metadata = CheckoutMetadata {
            cart_id,
            billing_address: request.billing_address.clone(),
            shipping_address: request.shipping_address.clone(),
            items: items.clone(),
            breakdown,
            customer_id,
            guest_email: guest_email.clone(),
        };
        let metadata_value = metadata.to_value()?;

        let session = self
            .gateway
            .initialize_transaction(&InitializeRequest {
                email: email.clone(),
                amount: breakdown.total,
                currency: currency.clone(),
                reference: reference.clone(),
                metadata: metadata_value.clone(),
                callback_url: None,
            })
            .await?;

        let now = Utc::now();
        let record = transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_method: Set(self.gateway.name().to_string()),
            gateway_reference: Set(reference),
            gateway_customer_id: Set(Some(customer.id)),
            amount: Set(breakdown.total),
            currency: Set(currency.clone()),
            status: Set(TransactionStatus::Pending),
            cart_id: Set(cart_id),
            items: Set(LineItems(items)),
            billing_address: Set(request.billing_address),
            shipping_address: Set(request.shipping_address),
            coupon_id: Set(coupon_id),
            order_id: Set(None),
            customer_id: Set(customer_id),
            guest_email: Set(guest_email),
            metadata: Set(metadata_value),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.deps.db)
        .await?;

        counter!("storefront_payments_initiated_total", 1);
        self.deps.event_sender.send_or_log(Event::PaymentInitiated {
            transaction_id: record.id,
            reference: record.gateway_reference.clone(),
            amount: record.amount,
            currency: record.currency.clone(),
        });
        info!(
            transaction_id = %record.id,
            reference = %record.gateway_reference,
            total = breakdown.total,
            "Payment initiated"
        );

        Ok(InitiatedPayment {
            reference: record.gateway_reference,
            access_code: session.access_code,
            authorization_url: session.authorization_url,
            transaction_id: record.id,
            breakdown,
        })
    }

    /// Returns the discount and coupon id to apply. With `strict_coupons`
    /// off, a rejected coupon is logged and checkout continues without it.
    async fn apply_coupon(
        &self,
        coupon_id: Uuid,
        cart: &CouponContext,
        caller: &Caller,
    ) -> Result<(i64, Option<Uuid>), ServiceError> {
        let outcome = match self.deps.coupons.find_by_id(coupon_id).await? {
            Some(coupon) => validate_coupon(&coupon, cart, caller.user_id(), Utc::now()),
            None => Err(CouponRejection::NotFound),
        };

        match outcome {
            Ok(applied) => Ok((applied.discount, Some(applied.coupon_id))),
            Err(rejection) if self.deps.config.strict_coupons => Err(rejection.into()),
            Err(rejection) => {
                warn!(
                    %coupon_id,
                    reason = %rejection,
                    "Coupon rejected; continuing without discount"
                );
                Ok((0, None))
            }
        }
    }
}
