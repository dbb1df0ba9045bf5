use crate::{
    config::CheckoutConfig,
    entities::{
        cart::{self, Entity as Cart},
        cart_item::{self, Entity as CartItem},
        documents::LineItemSnapshot,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::{self, CatalogLine},
        coupons::{CouponContext, CouponLine},
        Caller,
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Cart line as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

/// Cart with its ordered items
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub currency: String,
    pub subtotal: i64,
    pub purchased_at: Option<DateTime<Utc>>,
    pub items: Vec<CartItemView>,
}

/// Returned once when a cart is created
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedCart {
    #[serde(flatten)]
    pub cart: CartView,
    /// Present for guest carts only; send it back as `x-cart-secret`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_secret: Option<String>,
}

/// Input for adding an item to a cart
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

/// A cart and its items, loaded together
#[derive(Debug, Clone)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

impl CartWithItems {
    /// Price-free snapshot in cart order
    pub fn snapshot(&self) -> Vec<LineItemSnapshot> {
        self.items
            .iter()
            .map(|item| LineItemSnapshot {
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
            })
            .collect()
    }

    pub fn view(&self) -> CartView {
        CartView {
            id: self.cart.id,
            customer_id: self.cart.customer_id,
            currency: self.cart.currency.clone(),
            subtotal: self.cart.subtotal,
            purchased_at: self.cart.purchased_at,
            items: self
                .items
                .iter()
                .map(|item| CartItemView {
                    id: item.id,
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

/// Builds the coupon validator's view of a priced cart.
pub fn coupon_context(lines: &[CatalogLine], subtotal: i64, currency: &str) -> CouponContext {
    CouponContext {
        subtotal,
        currency: currency.to_string(),
        lines: lines
            .iter()
            .map(|line| CouponLine {
                product_id: line.product.id,
                category_ids: line.product.category_ids.0.clone(),
            })
            .collect(),
    }
}

/// Largest quantity a single cart line may hold
pub const MAX_LINE_QUANTITY: i32 = 10_000;

/// Shopping cart service.
///
/// Carts are owned by a customer or, for guests, unlocked with a secret that
/// is handed out once at creation. A purchased cart rejects every mutation.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    checkout: Arc<CheckoutConfig>,
}

impl CartService {
    /// Creates a new `CartService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `event_sender` - Event sender for publishing cart events
    /// * `checkout` - Checkout settings (default and supported currencies)
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        checkout: Arc<CheckoutConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            checkout,
        }
    }

    /// Creates an empty cart.
    ///
    /// Signed-in callers own the cart. Guests receive a freshly generated
    /// secret which is returned only in this response.
    ///
    /// # Returns
    ///
    /// * `Ok(CreatedCart)` - The new cart, plus the guest secret when applicable
    /// * `Err(ServiceError::ValidationError)` - Unsupported currency
    #[instrument(skip(self, caller))]
    pub async fn create_cart(
        &self,
        caller: &Caller,
        currency: Option<String>,
    ) -> Result<CreatedCart, ServiceError> {
        let currency = currency
            .map(|c| c.trim().to_ascii_uppercase())
            .unwrap_or_else(|| self.checkout.default_currency.to_ascii_uppercase());
        if !self.checkout.supports_currency(&currency) {
            return Err(ServiceError::ValidationError(format!(
                "Unsupported currency {}",
                currency
            )));
        }

        let customer_id = caller.user_id();
        let guest_secret = customer_id
            .is_none()
            .then(|| Uuid::new_v4().simple().to_string());

        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            guest_secret: Set(guest_secret.clone()),
            currency: Set(currency),
            subtotal: Set(0),
            purchased_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender.send_or_log(Event::CartCreated(cart.id));
        info!(cart_id = %cart.id, guest = customer_id.is_none(), "Created cart");

        Ok(CreatedCart {
            cart: CartWithItems {
                cart,
                items: Vec::new(),
            }
            .view(),
            cart_secret: guest_secret,
        })
    }

    /// Retrieves a cart with its items after checking the caller may see it.
    pub async fn get_cart(&self, cart_id: Uuid, caller: &Caller) -> Result<CartView, ServiceError> {
        let cart = Self::load(&*self.db, cart_id).await?;
        authorize(&cart.cart, caller)?;
        Ok(cart.view())
    }

    /// Loads a cart for checkout, enforcing the same access rules as reads.
    pub async fn load_for_checkout(
        &self,
        cart_id: Uuid,
        caller: &Caller,
    ) -> Result<CartWithItems, ServiceError> {
        let cart = Self::load(&*self.db, cart_id).await?;
        authorize(&cart.cart, caller)?;
        Ok(cart)
    }

    /// Prices a cart with live product data for coupon validation.
    pub async fn coupon_context_for(
        &self,
        cart_id: Uuid,
        caller: &Caller,
    ) -> Result<CouponContext, ServiceError> {
        let cart = self.load_for_checkout(cart_id, caller).await?;
        let lines = catalog::load_lines(&*self.db, &cart.snapshot()).await?;
        let subtotal = catalog::price_lines(&lines, &cart.cart.currency)?;
        Ok(coupon_context(&lines, subtotal, &cart.cart.currency))
    }

    /// Most recently updated open cart of a signed-in customer.
    pub async fn latest_open_cart(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<Uuid>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .filter(cart::Column::PurchasedAt.is_null())
            .order_by_desc(cart::Column::UpdatedAt)
            .one(&*self.db)
            .await?
            .map(|c| c.id))
    }

    /// Adds an item to the cart or merges it into the matching line.
    ///
    /// # Arguments
    ///
    /// * `cart_id` - UUID of the target cart
    /// * `caller` - Who is making the change
    /// * `input` - Product, optional variant and quantity (at least 1)
    ///
    /// # Returns
    ///
    /// * `Ok(CartView)` - Updated cart with a recomputed subtotal
    /// * `Err(ServiceError::NotFound)` - Cart, product or variant not found
    /// * `Err(ServiceError::InvalidOperation)` - Cart already purchased
    /// * `Err(ServiceError::MissingPrice)` - Product has no price in the cart currency
    #[instrument(skip(self, caller))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        caller: &Caller,
        input: AddToCartInput,
    ) -> Result<CartView, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }
        ensure_quantity_bound(input.quantity)?;

        let txn = self.db.begin().await?;
        let current = Self::load_mutable(&txn, cart_id, caller).await?;

        let existing = current.items.iter().find(|item| {
            item.product_id == input.product_id && item.variant_id == input.variant_id
        });

        let now = Utc::now();
        match existing {
            Some(item) => {
                let quantity = merged_quantity(item.quantity, input.quantity)?;
                let mut item: cart_item::ActiveModel = item.clone().into();
                item.quantity = Set(quantity);
                item.updated_at = Set(now);
                item.update(&txn).await?;
            }
            None => {
                let position = current.items.iter().map(|i| i.position).max().unwrap_or(0) + 1;
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart_id),
                    product_id: Set(input.product_id),
                    variant_id: Set(input.variant_id),
                    quantity: Set(input.quantity),
                    position: Set(position),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let updated = Self::recalculate(&txn, current.cart).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart_id));
        info!(
            "Added item to cart {}: product {} x{}",
            cart_id, input.product_id, input.quantity
        );
        Ok(updated.view())
    }

    /// Sets the quantity of a cart item; zero removes the line.
    #[instrument(skip(self, caller))]
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        caller: &Caller,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must not be negative".to_string(),
            ));
        }
        ensure_quantity_bound(quantity)?;

        let txn = self.db.begin().await?;
        let current = Self::load_mutable(&txn, cart_id, caller).await?;
        let item = find_item(&current, item_id)?;

        if quantity == 0 {
            CartItem::delete_by_id(item.id).exec(&txn).await?;
        } else {
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        }

        let updated = Self::recalculate(&txn, current.cart).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart_id));
        Ok(updated.view())
    }

    /// Removes a line from the cart.
    #[instrument(skip(self, caller))]
    pub async fn remove_item(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        caller: &Caller,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let current = Self::load_mutable(&txn, cart_id, caller).await?;
        let item = find_item(&current, item_id)?;

        CartItem::delete_by_id(item.id).exec(&txn).await?;

        let updated = Self::recalculate(&txn, current.cart).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart_id));
        Ok(updated.view())
    }

    pub(crate) async fn load<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::Position)
            .all(conn)
            .await?;

        Ok(CartWithItems { cart, items })
    }

    async fn load_mutable<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
        caller: &Caller,
    ) -> Result<CartWithItems, ServiceError> {
        let cart = Self::load(conn, cart_id).await?;
        authorize(&cart.cart, caller)?;
        if cart.cart.is_purchased() {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart {} has already been purchased",
                cart_id
            )));
        }
        Ok(cart)
    }

    /// Re-reads items and recomputes the subtotal from live prices.
    async fn recalculate<C: ConnectionTrait>(
        conn: &C,
        cart: cart::Model,
    ) -> Result<CartWithItems, ServiceError> {
        let reloaded = Self::load(conn, cart.id).await?;
        let lines = catalog::load_lines(conn, &reloaded.snapshot()).await?;
        let subtotal = catalog::price_lines(&lines, &cart.currency)?;

        let mut active: cart::ActiveModel = cart.into();
        active.subtotal = Set(subtotal);
        active.updated_at = Set(Utc::now());
        let cart = active.update(conn).await?;

        Ok(CartWithItems {
            cart,
            items: reloaded.items,
        })
    }
}

fn ensure_quantity_bound(quantity: i32) -> Result<(), ServiceError> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(ServiceError::ValidationError(format!(
            "Quantity may not exceed {} per line",
            MAX_LINE_QUANTITY
        )));
    }
    Ok(())
}

/// Quantity after adding `added` to an existing line, within the line bound.
fn merged_quantity(current: i32, added: i32) -> Result<i32, ServiceError> {
    let quantity = current.checked_add(added).ok_or_else(|| {
        ServiceError::ValidationError("Quantity is out of range".to_string())
    })?;
    ensure_quantity_bound(quantity)?;
    Ok(quantity)
}

fn find_item(cart: &CartWithItems, item_id: Uuid) -> Result<cart_item::Model, ServiceError> {
    cart.items
        .iter()
        .find(|item| item.id == item_id)
        .cloned()
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "Item {} not found in cart {}",
                item_id, cart.cart.id
            ))
        })
}

/// Customer carts are visible to their owner; guest carts to the secret holder.
pub fn authorize(cart: &cart::Model, caller: &Caller) -> Result<(), ServiceError> {
    match (cart.customer_id, &cart.guest_secret) {
        (Some(owner), _) if caller.user_id() == Some(owner) => Ok(()),
        (Some(_), _) => Err(ServiceError::Forbidden(
            "Cart belongs to another customer".to_string(),
        )),
        (None, Some(secret)) if caller.cart_secret.as_deref() == Some(secret.as_str()) => Ok(()),
        (None, _) => Err(ServiceError::Forbidden(
            "A valid cart secret is required".to_string(),
        )),
    }
}
