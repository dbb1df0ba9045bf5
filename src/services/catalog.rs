//! Read-side access to products and variants for pricing and stock checks.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::collections::HashMap;
use uuid::Uuid;

use crate::entities::documents::LineItemSnapshot;
use crate::entities::{product, product_variant};
use crate::errors::ServiceError;

/// A line item resolved against live catalog records
#[derive(Debug, Clone)]
pub struct CatalogLine {
    pub item: LineItemSnapshot,
    pub product: product::Model,
    pub variant: Option<product_variant::Model>,
}

impl CatalogLine {
    /// Variant price when set for `currency`, else the product price
    pub fn unit_price(&self, currency: &str) -> Option<i64> {
        self.variant
            .as_ref()
            .and_then(|v| v.prices.price_in(currency))
            .or_else(|| self.product.prices.price_in(currency))
    }

    /// Stock of the variant when one is selected, else of the product
    pub fn available(&self) -> i32 {
        self.variant
            .as_ref()
            .map_or(self.product.inventory, |v| v.inventory)
    }

    pub fn label(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{} ({})", self.product.name, variant.name),
            None => self.product.name.clone(),
        }
    }

    pub fn line_total(&self, currency: &str) -> Result<i64, ServiceError> {
        let unit = self.unit_price(currency).ok_or_else(|| {
            ServiceError::MissingPrice(format!(
                "{} has no price in {}",
                self.label(),
                currency
            ))
        })?;
        unit.checked_mul(i64::from(self.item.quantity))
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Line total for {} is out of range",
                    self.label()
                ))
            })
    }

    pub fn ensure_in_stock(&self) -> Result<(), ServiceError> {
        let available = self.available();
        if available < self.item.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "{} has {} left, {} requested",
                self.label(),
                available.max(0),
                self.item.quantity
            )));
        }
        Ok(())
    }
}

/// Loads products and variants for `items` in two queries, preserving order.
pub async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    items: &[LineItemSnapshot],
) -> Result<Vec<CatalogLine>, ServiceError> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let variant_ids: Vec<Uuid> = items.iter().filter_map(|i| i.variant_id).collect();

    let products: HashMap<Uuid, product::Model> = product::Entity::find()
        .filter(product::Column::Id.is_in(product_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let variants: HashMap<Uuid, product_variant::Model> = if variant_ids.is_empty() {
        HashMap::new()
    } else {
        product_variant::Entity::find()
            .filter(product_variant::Column::Id.is_in(variant_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect()
    };

    items
        .iter()
        .map(|item| {
            let product = products.get(&item.product_id).cloned().ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;
            let variant = match item.variant_id {
                Some(variant_id) => {
                    let variant = variants
                        .get(&variant_id)
                        .filter(|v| v.product_id == item.product_id)
                        .cloned()
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Variant {} not found for product {}",
                                variant_id, item.product_id
                            ))
                        })?;
                    Some(variant)
                }
                None => None,
            };
            Ok(CatalogLine {
                item: item.clone(),
                product,
                variant,
            })
        })
        .collect()
}

/// Sum of line totals in `currency`; any unpriced line is an error.
pub fn price_lines(lines: &[CatalogLine], currency: &str) -> Result<i64, ServiceError> {
    lines.iter().try_fold(0i64, |acc, line| {
        acc.checked_add(line.line_total(currency)?)
            .ok_or_else(|| ServiceError::ValidationError("Cart total is out of range".into()))
    })
}
