//! Stock decrement for confirmed orders. This is the only code that writes
//! product or variant inventory.

use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, error};
use uuid::Uuid;

use crate::entities::documents::LineItemSnapshot;
use crate::entities::{product, product_variant};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    Applied,
    /// Not enough stock; nothing was written
    Shortfall {
        product_id: Uuid,
        variant_id: Option<Uuid>,
        requested: i32,
        /// `None` when the record no longer exists
        available: Option<i32>,
    },
}

/// Decrements stock for one line only if enough remains.
pub async fn decrement<C: ConnectionTrait>(
    conn: &C,
    item: &LineItemSnapshot,
) -> Result<DecrementOutcome, ServiceError> {
    let quantity = item.quantity;

    let (rows_affected, available) = match item.variant_id {
        Some(variant_id) => {
            let result = product_variant::Entity::update_many()
                .col_expr(
                    product_variant::Column::Inventory,
                    Expr::col(product_variant::Column::Inventory).sub(quantity),
                )
                .filter(product_variant::Column::Id.eq(variant_id))
                .filter(product_variant::Column::Inventory.gte(quantity))
                .exec(conn)
                .await?;
            let available = if result.rows_affected == 0 {
                product_variant::Entity::find_by_id(variant_id)
                    .one(conn)
                    .await?
                    .map(|v| v.inventory)
            } else {
                None
            };
            (result.rows_affected, available)
        }
        None => {
            let result = product::Entity::update_many()
                .col_expr(
                    product::Column::Inventory,
                    Expr::col(product::Column::Inventory).sub(quantity),
                )
                .filter(product::Column::Id.eq(item.product_id))
                .filter(product::Column::Inventory.gte(quantity))
                .exec(conn)
                .await?;
            let available = if result.rows_affected == 0 {
                product::Entity::find_by_id(item.product_id)
                    .one(conn)
                    .await?
                    .map(|p| p.inventory)
            } else {
                None
            };
            (result.rows_affected, available)
        }
    };

    if rows_affected > 0 {
        debug!(
            product_id = %item.product_id,
            variant_id = ?item.variant_id,
            quantity,
            "Inventory decremented"
        );
        return Ok(DecrementOutcome::Applied);
    }

    error!(
        product_id = %item.product_id,
        variant_id = ?item.variant_id,
        requested = quantity,
        ?available,
        "Inventory shortfall while fulfilling a paid order"
    );
    Ok(DecrementOutcome::Shortfall {
        product_id: item.product_id,
        variant_id: item.variant_id,
        requested: quantity,
        available,
    })
}
