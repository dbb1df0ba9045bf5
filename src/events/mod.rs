use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Domain events emitted by the checkout core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartUpdated(Uuid),

    // Payment events
    PaymentInitiated {
        transaction_id: Uuid,
        reference: String,
        amount: i64,
        currency: String,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        transaction_id: Uuid,
        total: i64,
        currency: String,
    },

    /// Stock could not cover a paid order; needs refund or restock.
    InventoryShortfall {
        order_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        requested: i32,
        available: Option<i32>,
    },

    // Coupon events
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
        user_id: Uuid,
    },
    CouponLimitOverrun {
        coupon_id: Uuid,
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Enqueues an event without waiting; a full or closed channel is logged.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping domain event: {}", e);
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::InventoryShortfall {
                order_id,
                product_id,
                variant_id,
                requested,
                available,
            } => {
                error!(
                    %order_id,
                    %product_id,
                    ?variant_id,
                    requested,
                    ?available,
                    "Inventory shortfall on confirmed order; refund or restock required"
                );
            }
            Event::CouponLimitOverrun { coupon_id, order_id } => {
                warn!(%coupon_id, %order_id, "Coupon redeemed past its usage limit");
            }
            other => info!(event = ?other, "Domain event"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_drops_when_channel_is_full() {
        let (sender, mut rx) = channel(1);
        let cart_id = Uuid::new_v4();
        sender.send_or_log(Event::CartCreated(cart_id));
        sender.send_or_log(Event::CartUpdated(cart_id));

        assert_eq!(rx.recv().await, Some(Event::CartCreated(cart_id)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (sender, rx) = channel(4);
        drop(rx);
        assert!(sender.send(Event::CartCreated(Uuid::new_v4())).await.is_err());
    }
}
