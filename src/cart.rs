//! Session-scoped shopping cart.
//!
//! A [`Cart`] maps product ids to quantities and never stores a quantity below
//! one. Carts persisted in a session may come in two shapes (a bare quantity or
//! a denormalized record); both are resolved into [`SessionCartEntry`] exactly
//! once, in [`Cart::from_session_value`], and nothing downstream sees them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Largest quantity a single line may hold (the `order_items.quantity` column is `INTEGER`).
pub const MAX_LINE_QUANTITY: u32 = i32::MAX as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CartEntry {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart {
    entries: BTreeMap<Uuid, u32>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `quantity` units, summing with any existing line. Returns the new line quantity.
    pub fn add_item(&mut self, product_id: Uuid, quantity: i64) -> AppResult<u32> {
        if quantity < 1 {
            return Err(AppError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        let current = u64::from(self.quantity_of(product_id));
        let next = u64::try_from(quantity)
            .ok()
            .and_then(|q| q.checked_add(current))
            .filter(|q| *q <= u64::from(MAX_LINE_QUANTITY))
            .ok_or_else(|| AppError::Validation("quantity is too large".to_string()))?;
        // bounded by MAX_LINE_QUANTITY above
        let next = next as u32;
        self.entries.insert(product_id, next);
        Ok(next)
    }

    /// Replaces the line quantity outright; zero or less removes the line.
    pub fn set_item(&mut self, product_id: Uuid, quantity: i64) -> AppResult<()> {
        if quantity <= 0 {
            self.entries.remove(&product_id);
            return Ok(());
        }
        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q <= MAX_LINE_QUANTITY)
            .ok_or_else(|| AppError::Validation("quantity is too large".to_string()))?;
        self.entries.insert(product_id, quantity);
        Ok(())
    }

    /// Idempotent; returns whether a line was actually removed.
    pub fn remove_item(&mut self, product_id: Uuid) -> bool {
        self.entries.remove(&product_id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn quantity_of(&self, product_id: Uuid) -> u32 {
        self.entries.get(&product_id).copied().unwrap_or(0)
    }

    /// Total number of units across all lines.
    pub fn item_count(&self) -> u64 {
        self.entries.values().map(|q| u64::from(*q)).sum()
    }

    pub fn entries(&self) -> impl Iterator<Item = CartEntry> + '_ {
        self.entries
            .iter()
            .map(|(product_id, quantity)| CartEntry {
                product_id: *product_id,
                quantity: *quantity,
            })
    }

    pub fn product_ids(&self) -> Vec<Uuid> {
        self.entries.keys().copied().collect()
    }

    /// Rebuilds a cart from its persisted session form.
    ///
    /// Entries that cannot be trusted (non-UUID keys, quantities that are not
    /// positive integers, unknown shapes) are left out of the cart and returned
    /// alongside it so callers can account for them.
    pub fn from_session_value(value: &Value) -> (Cart, Vec<MalformedEntry>) {
        let mut cart = Cart::new();
        let mut skipped = Vec::new();

        let map = match value {
            Value::Object(map) => map,
            Value::Null => return (cart, skipped),
            other => {
                skipped.push(MalformedEntry::new("*", format!("cart is not an object: {other}")));
                log_skipped(&skipped);
                return (cart, skipped);
            }
        };

        for (key, raw) in map {
            let product_id = match Uuid::parse_str(key) {
                Ok(id) => id,
                Err(_) => {
                    skipped.push(MalformedEntry::new(key, "product id is not a UUID"));
                    continue;
                }
            };
            let entry = match serde_json::from_value::<SessionCartEntry>(raw.clone()) {
                Ok(entry) => entry,
                Err(_) => {
                    skipped.push(MalformedEntry::new(key, format!("unrecognized entry: {raw}")));
                    continue;
                }
            };
            if let SessionCartEntry::Denormalized(record) = &entry {
                tracing::debug!(
                    product_id = %product_id,
                    name = ?record.name,
                    price = ?record.price,
                    "normalizing denormalized cart entry"
                );
            }
            let quantity = entry.quantity();
            if quantity < 1 {
                skipped.push(MalformedEntry::new(
                    key,
                    format!("non-positive quantity {quantity}"),
                ));
                continue;
            }
            if let Err(err) = cart.add_item(product_id, quantity) {
                skipped.push(MalformedEntry::new(key, err.to_string()));
            }
        }

        log_skipped(&skipped);
        (cart, skipped)
    }

    /// Persisted form: always the simple `{"<product id>": quantity}` shape.
    pub fn to_session_value(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(id, qty)| (id.to_string(), Value::from(*qty)))
            .collect();
        Value::Object(map)
    }
}

fn log_skipped(skipped: &[MalformedEntry]) {
    for entry in skipped {
        tracing::warn!(key = %entry.key, reason = %entry.reason, "skipping malformed cart entry");
    }
}

/// One persisted cart value, as found in session storage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SessionCartEntry {
    Simple(i64),
    Denormalized(DenormalizedEntry),
}

/// Shape written by the one-click add path: a copy of the product's name and
/// price next to the quantity. Name and price are informational only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DenormalizedEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    pub quantity: i64,
}

impl SessionCartEntry {
    pub fn quantity(&self) -> i64 {
        match self {
            SessionCartEntry::Simple(quantity) => *quantity,
            SessionCartEntry::Denormalized(record) => record.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MalformedEntry {
    pub key: String,
    pub reason: String,
}

impl MalformedEntry {
    fn new(key: &str, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn add_item_sums_quantities() {
        let id = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(id, 2).unwrap();
        assert_eq!(cart.add_item(id, 3).unwrap(), 5);
        assert_eq!(cart.quantity_of(id), 5);
        assert_eq!(cart.len(), 1);
    }

    #[test]
    fn add_item_rejects_non_positive_quantity() {
        let mut cart = Cart::new();
        assert!(matches!(
            cart.add_item(Uuid::new_v4(), 0),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            cart.add_item(Uuid::new_v4(), -4),
            Err(AppError::Validation(_))
        ));
        assert!(cart.is_empty());
    }

    #[test]
    fn add_item_rejects_overflow_and_keeps_line() {
        let id = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(id, i64::from(MAX_LINE_QUANTITY)).unwrap();
        assert!(cart.add_item(id, 1).is_err());
        assert_eq!(cart.quantity_of(id), MAX_LINE_QUANTITY);
    }

    #[test]
    fn set_item_replaces_and_removes() {
        let id = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(id, 4).unwrap();
        cart.set_item(id, 1).unwrap();
        assert_eq!(cart.quantity_of(id), 1);
        cart.set_item(id, 0).unwrap();
        assert!(cart.is_empty());
        cart.set_item(id, -3).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn remove_item_is_idempotent() {
        let id = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(id, 1).unwrap();
        assert!(cart.remove_item(id));
        assert!(!cart.remove_item(id));
        assert!(cart.is_empty());
    }

    #[test]
    fn normalizes_both_session_shapes() {
        let simple = Uuid::new_v4();
        let denormalized = Uuid::new_v4();
        let value = json!({
            simple.to_string(): 2,
            denormalized.to_string(): { "name": "Mug", "price": "12.00", "quantity": 3 },
        });

        let (cart, skipped) = Cart::from_session_value(&value);

        assert!(skipped.is_empty());
        assert_eq!(cart.quantity_of(simple), 2);
        assert_eq!(cart.quantity_of(denormalized), 3);
    }

    #[test]
    fn skips_malformed_entries() {
        let good = Uuid::new_v4();
        let value = json!({
            good.to_string(): 1,
            Uuid::new_v4().to_string(): "abc",
            Uuid::new_v4().to_string(): -2,
            Uuid::new_v4().to_string(): 0,
            Uuid::new_v4().to_string(): { "name": "No quantity" },
            Uuid::new_v4().to_string(): 1.5,
            "not-a-uuid": 4,
        });

        let (cart, skipped) = Cart::from_session_value(&value);

        assert_eq!(cart.len(), 1);
        assert_eq!(cart.quantity_of(good), 1);
        assert_eq!(skipped.len(), 6);
    }

    #[test]
    fn non_object_session_value_is_an_empty_cart() {
        let (cart, skipped) = Cart::from_session_value(&json!([1, 2, 3]));
        assert!(cart.is_empty());
        assert_eq!(skipped.len(), 1);

        let (cart, skipped) = Cart::from_session_value(&Value::Null);
        assert!(cart.is_empty());
        assert!(skipped.is_empty());
    }

    #[test]
    fn session_value_is_written_in_simple_shape() {
        let id = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(id, 7).unwrap();

        assert_eq!(cart.to_session_value(), json!({ id.to_string(): 7 }));
    }
}
