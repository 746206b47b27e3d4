//! Cart pricing.
//!
//! Pricing runs in one of two modes. [`PricingMode::Display`] renders whatever
//! can be priced and leaves out lines whose product has disappeared from the
//! catalog. [`PricingMode::Checkout`] refuses the whole cart on the first such
//! line. All arithmetic is fixed-point [`Decimal`].

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    cart::Cart,
    checkout::Rejection,
    error::AppResult,
    models::Product,
    services::catalog_service::CatalogStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingMode {
    Display,
    Checkout,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub slug: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub total: Decimal,
    pub item_count: u64,
    /// Products referenced by the cart that no longer exist in the catalog.
    pub unavailable: Vec<Uuid>,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub fn line_subtotal(unit_price: Decimal, quantity: u32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

/// Prices `cart` against an already-resolved set of products.
pub fn price_lines(
    cart: &Cart,
    products: &HashMap<Uuid, Product>,
    mode: PricingMode,
) -> Result<CartView, Rejection> {
    let mut view = CartView::default();

    for entry in cart.entries() {
        if entry.quantity < 1 {
            return Err(Rejection::InvalidQuantity(entry.product_id));
        }
        let Some(product) = products.get(&entry.product_id) else {
            match mode {
                PricingMode::Checkout => {
                    return Err(Rejection::ProductNotFound(entry.product_id));
                }
                PricingMode::Display => {
                    tracing::warn!(
                        product_id = %entry.product_id,
                        "cart references a product missing from the catalog, omitting it"
                    );
                    view.unavailable.push(entry.product_id);
                    continue;
                }
            }
        };

        let subtotal = line_subtotal(product.price, entry.quantity);
        view.total += subtotal;
        view.item_count += u64::from(entry.quantity);
        view.lines.push(CartLine {
            product_id: product.id,
            slug: product.slug.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            quantity: entry.quantity,
            subtotal,
        });
    }

    Ok(view)
}

/// Resolves every product in `cart` through `catalog`, then prices it.
pub async fn price_cart(
    cart: &Cart,
    catalog: &dyn CatalogStore,
    mode: PricingMode,
) -> AppResult<CartView> {
    if cart.is_empty() {
        return Ok(CartView::default());
    }
    let products = catalog.find_products(&cart.product_ids()).await?;
    let by_id = index_products(products);
    price_lines(cart, &by_id, mode).map_err(Into::into)
}

pub fn index_products(products: Vec<Product>) -> HashMap<Uuid, Product> {
    products.into_iter().map(|p| (p.id, p)).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn product(price: &str) -> Product {
        let id = Uuid::new_v4();
        Product {
            id,
            slug: format!("product-{id}"),
            name: "Thing".to_string(),
            description: String::new(),
            price: price.parse().unwrap(),
            category: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn subtotal_has_no_rounding_drift() {
        let p = product("19.99");
        let mut cart = Cart::new();
        cart.add_item(p.id, 3).unwrap();

        let view = price_lines(&cart, &index_products(vec![p]), PricingMode::Checkout).unwrap();

        assert_eq!(view.total, "59.97".parse::<Decimal>().unwrap());
        assert_eq!(view.total.to_string(), "59.97");
        assert_eq!(view.item_count, 3);
    }

    #[test]
    fn display_mode_omits_missing_products() {
        let p = product("5.00");
        let missing = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(p.id, 2).unwrap();
        cart.add_item(missing, 1).unwrap();

        let view = price_lines(&cart, &index_products(vec![p]), PricingMode::Display).unwrap();

        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.total, Decimal::new(1000, 2));
        assert_eq!(view.unavailable, vec![missing]);
    }

    #[test]
    fn checkout_mode_rejects_missing_products() {
        let p = product("5.00");
        let missing = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(p.id, 2).unwrap();
        cart.add_item(missing, 1).unwrap();

        let result = price_lines(&cart, &index_products(vec![p]), PricingMode::Checkout);

        assert_eq!(result, Err(Rejection::ProductNotFound(missing)));
    }

    #[test]
    fn empty_cart_prices_to_zero() {
        let view = price_lines(&Cart::new(), &HashMap::new(), PricingMode::Display).unwrap();
        assert!(view.is_empty());
        assert_eq!(view.total, Decimal::ZERO);
    }
}
