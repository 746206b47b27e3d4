use std::collections::HashMap;

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront::{
    cart::Cart,
    models::Product,
    pricing::{PricingMode, price_lines},
};
use uuid::Uuid;

fn product(cents: i64) -> Product {
    let id = Uuid::new_v4();
    Product {
        id,
        slug: id.to_string(),
        name: "Item".to_string(),
        description: String::new(),
        price: Decimal::new(cents, 2),
        category: None,
        created_at: Utc::now(),
    }
}

proptest! {
    #[test]
    fn total_is_sum_of_quantity_times_price(
        lines in prop::collection::vec((0i64..10_000_000, 1i64..10_000), 1..20)
    ) {
        let mut cart = Cart::new();
        let mut catalog = HashMap::new();
        let mut expected = Decimal::ZERO;
        let mut count = 0u64;
        for (cents, qty) in &lines {
            let p = product(*cents);
            cart.add_item(p.id, *qty).unwrap();
            expected += Decimal::new(*cents, 2) * Decimal::from(*qty);
            count += *qty as u64;
            catalog.insert(p.id, p);
        }

        let view = price_lines(&cart, &catalog, PricingMode::Checkout).unwrap();
        prop_assert_eq!(view.total, expected);
        prop_assert_eq!(view.item_count, count);
        let line_sum: Decimal = view.lines.iter().map(|l| l.subtotal).sum();
        prop_assert_eq!(line_sum, view.total);
    }

    #[test]
    fn add_item_is_additive(a in 1i64..1_000_000, b in 1i64..1_000_000) {
        let id = Uuid::new_v4();
        let mut split = Cart::new();
        split.add_item(id, a).unwrap();
        split.add_item(id, b).unwrap();

        let mut once = Cart::new();
        once.add_item(id, a + b).unwrap();

        prop_assert_eq!(split.quantity_of(id) as i64, a + b);
        prop_assert_eq!(split, once);
    }

    #[test]
    fn stored_cart_never_holds_non_positive_lines(
        raw in prop::collection::vec(-5i64..5, 0..10)
    ) {
        let mut map = serde_json::Map::new();
        for qty in &raw {
            map.insert(Uuid::new_v4().to_string(), serde_json::json!(qty));
        }
        let (cart, skipped) = Cart::from_session_value(&serde_json::Value::Object(map));
        prop_assert!(cart.entries().all(|e| e.quantity >= 1));
        prop_assert_eq!(cart.len() + skipped.len(), raw.len());
    }
}
