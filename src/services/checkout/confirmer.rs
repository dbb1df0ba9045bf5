use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{CheckoutMetadata, ConfirmedOrder, GatewayCheckout};
use crate::entities::documents::LineItems;
use crate::entities::order::{self, OrderStatus};
use crate::entities::transaction::{self, TransactionStatus};
use crate::entities::cart;
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::{
    coupons::{CouponService, RedemptionOutcome},
    gateway::{GatewayPaymentStatus, VerifiedTransaction},
    inventory::{self, DecrementOutcome},
};

/// Follow-up work discovered while committing an order
struct Fulfilment {
    shortfalls: Vec<DecrementOutcome>,
    redemption: Option<(Uuid, RedemptionOutcome)>,
}

impl GatewayCheckout {
    /// Verifies a payment with the gateway and turns it into an order.
    ///
    /// Safe to repeat: once the transaction is `succeeded` the existing order
    /// is returned and nothing is written.
    #[instrument(skip(self, guest_email), fields(gateway = %self.gateway.name()))]
    pub(super) async fn confirm(
        &self,
        reference: &str,
        customer_id: Option<Uuid>,
        guest_email: Option<String>,
    ) -> Result<ConfirmedOrder, ServiceError> {
        let record = transaction::Entity::find()
            .filter(transaction::Column::GatewayReference.eq(reference))
            .one(&*self.deps.db)
            .await?
            .ok_or_else(|| {
                ServiceError::BadRequest(format!(
                    "No transaction found for reference {}",
                    reference
                ))
            })?;

        // The transaction owner is authoritative; a session only has to agree with it.
        if let (Some(owner), Some(caller)) = (record.customer_id, customer_id) {
            if owner != caller {
                warn!(%reference, "Confirmation attempted by a different customer");
                return Err(ServiceError::Forbidden(
                    "Transaction belongs to another customer".into(),
                ));
            }
        }

        match record.status {
            TransactionStatus::Succeeded => return self.already_confirmed(&record).await,
            TransactionStatus::Pending => {}
            other => {
                return Err(ServiceError::InvalidOperation(format!(
                    "Transaction {} is {}",
                    reference,
                    other.as_str()
                )))
            }
        }

        let verified = self.gateway.verify_transaction(reference).await?;
        match &verified.status {
            GatewayPaymentStatus::Success => {}
            GatewayPaymentStatus::Failed => {
                self.mark_failed(record.id).await?;
                return Err(ServiceError::PaymentFailed(format!(
                    "Payment {} failed at the gateway",
                    reference
                )));
            }
            GatewayPaymentStatus::Other(status) => {
                return Err(ServiceError::PaymentFailed(format!(
                    "Payment {} is {}",
                    reference, status
                )));
            }
        }

        ensure_matches(&record, &verified)?;

        let metadata = CheckoutMetadata::from_gateway(verified.metadata.clone())?;
        if metadata.cart_id != record.cart_id {
            error!(%reference, "Gateway metadata points at a different cart");
            return Err(ServiceError::InternalError(
                "Checkout metadata does not match the transaction".into(),
            ));
        }

        let customer_id = record.customer_id.or(metadata.customer_id);
        let guest_email = match customer_id {
            Some(_) => None,
            None => record
                .guest_email
                .clone()
                .or_else(|| metadata.guest_email.clone())
                .or(guest_email),
        };

        let order_id = Uuid::new_v4();
        let txn = self.deps.db.begin().await?;

        // Only one caller can move the transaction out of `pending`.
        let claimed = transaction::Entity::update_many()
            .col_expr(
                transaction::Column::Status,
                TransactionStatus::Succeeded.as_str().into(),
            )
            .col_expr(transaction::Column::OrderId, Some(order_id).into())
            .col_expr(transaction::Column::UpdatedAt, Utc::now().into())
            .filter(transaction::Column::Id.eq(record.id))
            .filter(transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(&txn)
            .await?;

        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            counter!("storefront_duplicate_confirmations_total", 1);
            let current = transaction::Entity::find_by_id(record.id)
                .one(&*self.deps.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Transaction {} vanished", record.id))
                })?;
            return self.already_confirmed(&current).await;
        }

        let now = Utc::now();
        let created = order::ActiveModel {
            id: Set(order_id),
            transaction_id: Set(record.id),
            cart_id: Set(metadata.cart_id),
            currency: Set(verified.currency.clone()),
            subtotal: Set(metadata.breakdown.subtotal),
            shipping_fee: Set(metadata.breakdown.shipping_fee),
            tax: Set(metadata.breakdown.tax),
            discount: Set(metadata.breakdown.discount),
            total: Set(verified.amount),
            status: Set(OrderStatus::Processing),
            items: Set(LineItems(metadata.items.clone())),
            shipping_address: Set(metadata.shipping_address.clone()),
            customer_id: Set(customer_id),
            guest_email: Set(guest_email),
            coupon_id: Set(metadata.breakdown.coupon_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        mark_cart_purchased(&txn, metadata.cart_id).await?;
        let fulfilment = fulfil(&txn, &metadata, customer_id).await?;

        txn.commit().await?;

        counter!("storefront_orders_confirmed_total", 1);
        info!(
            order_id = %created.id,
            transaction_id = %record.id,
            total = created.total,
            "Order confirmed"
        );
        self.publish(&created, fulfilment);

        Ok(ConfirmedOrder {
            order_id: created.id,
            already_confirmed: false,
        })
    }

    async fn already_confirmed(
        &self,
        record: &transaction::Model,
    ) -> Result<ConfirmedOrder, ServiceError> {
        let existing = order::Entity::find()
            .filter(order::Column::TransactionId.eq(record.id))
            .one(&*self.deps.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Transaction {} succeeded without an order",
                    record.id
                ))
            })?;
        info!(order_id = %existing.id, "Order already confirmed");
        Ok(ConfirmedOrder {
            order_id: existing.id,
            already_confirmed: true,
        })
    }

    async fn mark_failed(&self, transaction_id: Uuid) -> Result<(), ServiceError> {
        transaction::Entity::update_many()
            .col_expr(
                transaction::Column::Status,
                TransactionStatus::Failed.as_str().into(),
            )
            .col_expr(transaction::Column::UpdatedAt, Utc::now().into())
            .filter(transaction::Column::Id.eq(transaction_id))
            .filter(transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(&*self.deps.db)
            .await?;
        warn!(%transaction_id, "Transaction marked failed");
        Ok(())
    }

    fn publish(&self, created: &order::Model, fulfilment: Fulfilment) {
        let events = &self.deps.event_sender;
        events.send_or_log(Event::OrderCreated {
            order_id: created.id,
            transaction_id: created.transaction_id,
            total: created.total,
            currency: created.currency.clone(),
        });

        for shortfall in fulfilment.shortfalls {
            if let DecrementOutcome::Shortfall {
                product_id,
                variant_id,
                requested,
                available,
            } = shortfall
            {
                counter!("storefront_inventory_shortfalls_total", 1);
                events.send_or_log(Event::InventoryShortfall {
                    order_id: created.id,
                    product_id,
                    variant_id,
                    requested,
                    available,
                });
            }
        }

        match (fulfilment.redemption, created.customer_id) {
            (Some((coupon_id, RedemptionOutcome::Recorded)), Some(user_id)) => {
                events.send_or_log(Event::CouponRedeemed {
                    coupon_id,
                    order_id: created.id,
                    user_id,
                });
            }
            (Some((coupon_id, RedemptionOutcome::LimitOverrun)), _) => {
                counter!("storefront_coupon_limit_overruns_total", 1);
                events.send_or_log(Event::CouponLimitOverrun {
                    coupon_id,
                    order_id: created.id,
                });
            }
            _ => {}
        }
    }
}

/// The gateway's amount and currency must be what we asked it to charge.
fn ensure_matches(
    record: &transaction::Model,
    verified: &VerifiedTransaction,
) -> Result<(), ServiceError> {
    if verified.amount != record.amount || !verified.currency.eq_ignore_ascii_case(&record.currency)
    {
        error!(
            reference = %record.gateway_reference,
            expected_amount = record.amount,
            expected_currency = %record.currency,
            paid_amount = verified.amount,
            paid_currency = %verified.currency,
            "Verified payment does not match the pending transaction"
        );
        return Err(ServiceError::BadRequest(
            "Verified payment does not match the transaction".into(),
        ));
    }
    Ok(())
}

async fn mark_cart_purchased<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    let result = cart::Entity::update_many()
        .col_expr(cart::Column::PurchasedAt, Some(now).into())
        .col_expr(cart::Column::UpdatedAt, now.into())
        .filter(cart::Column::Id.eq(cart_id))
        .filter(cart::Column::PurchasedAt.is_null())
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        warn!(%cart_id, "Cart was already purchased or no longer exists");
    }
    Ok(())
}

/// Inventory decrements and coupon bookkeeping for a confirmed order.
async fn fulfil<C: ConnectionTrait>(
    conn: &C,
    metadata: &CheckoutMetadata,
    customer_id: Option<Uuid>,
) -> Result<Fulfilment, ServiceError> {
    let mut shortfalls = Vec::new();
    for item in &metadata.items {
        let outcome = inventory::decrement(conn, item).await?;
        if matches!(outcome, DecrementOutcome::Shortfall { .. }) {
            shortfalls.push(outcome);
        }
    }

    let redemption = match metadata.breakdown.coupon_id {
        Some(coupon_id) => Some((
            coupon_id,
            CouponService::record_redemption(conn, coupon_id, customer_id).await?,
        )),
        None => None,
    };

    Ok(Fulfilment {
        shortfalls,
        redemption,
    })
}
