use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::CheckoutConfig;
use crate::entities::documents::RegionRules;
use crate::entities::shipping_settings::{self, SINGLETON_ID};
use crate::errors::ServiceError;
use crate::services::fees::ShippingConfig;

/// Reads the global shipping settings row, falling back to configured defaults.
#[derive(Clone)]
pub struct ShippingService {
    db: Arc<DatabaseConnection>,
    defaults: ShippingConfig,
}

impl ShippingService {
    pub fn new(db: Arc<DatabaseConnection>, checkout: &CheckoutConfig) -> Self {
        Self {
            db,
            defaults: ShippingConfig {
                base_fee: checkout.default_shipping_fee,
                free_shipping_threshold: checkout.free_shipping_threshold,
                tax_rate: checkout.tax_rate,
                region_rules: Vec::new(),
            },
        }
    }

    pub async fn current(&self) -> Result<ShippingConfig, ServiceError> {
        let Some(row) = shipping_settings::Entity::find_by_id(SINGLETON_ID)
            .one(&*self.db)
            .await?
        else {
            debug!("No shipping settings stored; using configured defaults");
            return Ok(self.defaults.clone());
        };

        Ok(ShippingConfig {
            base_fee: row.base_fee,
            free_shipping_threshold: row.free_shipping_threshold,
            tax_rate: row.tax_rate,
            region_rules: row.region_rules.0,
        })
    }

    /// Replaces the stored settings.
    pub async fn save(&self, settings: ShippingConfig) -> Result<(), ServiceError> {
        let existing = shipping_settings::Entity::find_by_id(SINGLETON_ID)
            .one(&*self.db)
            .await?;

        let mut model = shipping_settings::ActiveModel {
            id: Set(SINGLETON_ID),
            base_fee: Set(settings.base_fee),
            free_shipping_threshold: Set(settings.free_shipping_threshold),
            tax_rate: Set(settings.tax_rate),
            region_rules: Set(RegionRules(settings.region_rules)),
            updated_at: Set(Utc::now()),
        };

        if existing.is_some() {
            model.id = sea_orm::ActiveValue::Unchanged(SINGLETON_ID);
            model.update(&*self.db).await?;
        } else {
            model.insert(&*self.db).await?;
        }
        info!("Shipping settings updated");
        Ok(())
    }
}
