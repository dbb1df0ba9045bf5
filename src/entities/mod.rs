pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod documents;
pub mod order;
pub mod product;
pub mod product_variant;
pub mod shipping_settings;
pub mod transaction;
