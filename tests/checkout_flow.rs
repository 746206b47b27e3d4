mod common;

use std::{sync::Arc, time::Duration};

use rust_decimal::Decimal;
use serde_json::json;
use storefront::{
    checkout::{CheckoutOrchestrator, CheckoutOutcome, Rejection},
    dto::cart::AddToCartForm,
    error::AppError,
    models::items_total,
    services::{
        cart_service::{self, SessionStore},
        memory::MemoryStore,
        order_service::{self, OrderStore},
    },
};

use common::{logged_in, memory_state, price, session_of};

fn form(quantity: &str) -> AddToCartForm {
    AddToCartForm {
        quantity: Some(quantity.to_string()),
    }
}

fn orchestrator(store: &MemoryStore, timeout: Duration) -> CheckoutOrchestrator {
    CheckoutOrchestrator::new(Arc::new(store.clone()), Arc::new(store.clone()), timeout)
}

#[tokio::test]
async fn checkout_turns_cart_into_order_and_empties_it() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    let p1 = store.add_product("p1", "Widget", price("10.00"), None).await;
    let p2 = store.add_product("p2", "Gadget", price("5.00"), None).await;
    let user = logged_in(&store, "alice").await;
    let session = session_of(&user);

    cart_service::add_to_cart(&state, &session, "p1", form("2")).await?;
    cart_service::add_to_cart(&state, &session, "p2", form("1")).await?;

    let placed = order_service::checkout(&state, &user)
        .await?
        .into_data()
        .expect("order");

    assert_eq!(placed.order.total, price("25.00"));
    assert_eq!(placed.total, price("25.00"));
    assert_eq!(placed.order.user_id, user.user_id);
    assert!(!placed.order.paid);
    let mut lines: Vec<_> = placed
        .items
        .iter()
        .map(|i| (i.product_id, i.quantity))
        .collect();
    lines.sort();
    let mut expected = vec![(p1.id, 2), (p2.id, 1)];
    expected.sort();
    assert_eq!(lines, expected);

    assert_eq!(store.raw_cart(user.session_id).await, Some(json!({})));
    assert!(store.load_cart(user.session_id).await?.cart.is_empty());
    assert_eq!(store.orders().await.len(), 1);
    assert_eq!(store.order_items().await.len(), 2);

    let audit = store.audit_entries().await;
    assert!(audit.iter().any(|e| e.action == "checkout"));
    Ok(())
}

#[tokio::test]
async fn empty_cart_is_rejected_without_touching_order_storage() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    let user = logged_in(&store, "bob").await;

    let outcome = state.checkout.checkout(&user).await?;
    assert!(matches!(outcome, CheckoutOutcome::Rejected(Rejection::EmptyCart)));
    assert_eq!(store.checkouts_begun(), 0);

    let err = order_service::checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));
    assert!(store.orders().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn cart_of_zero_quantities_behaves_as_empty() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    let p1 = store.add_product("p1", "Widget", price("10.00"), None).await;
    let p2 = store.add_product("p2", "Gadget", price("5.00"), None).await;
    let user = logged_in(&store, "carol").await;
    store
        .put_raw_cart(
            user.session_id,
            json!({
                (p1.id.to_string()): 0,
                (p2.id.to_string()): { "name": "Gadget", "price": "5.00", "quantity": 0 }
            }),
        )
        .await;

    let outcome = state.checkout.checkout(&user).await?;
    assert!(matches!(outcome, CheckoutOutcome::Rejected(Rejection::EmptyCart)));
    assert_eq!(store.checkouts_begun(), 0);
    Ok(())
}

#[tokio::test]
async fn deleted_product_fails_the_whole_checkout() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store.add_product("p1", "Widget", price("10.00"), None).await;
    let p2 = store.add_product("p2", "Gadget", price("5.00"), None).await;
    let user = logged_in(&store, "dave").await;
    let session = session_of(&user);
    cart_service::add_to_cart(&state, &session, "p1", form("1")).await?;
    cart_service::add_to_cart(&state, &session, "p2", form("3")).await?;

    store.remove_product(p2.id).await;

    let outcome = state.checkout.checkout(&user).await?;
    match outcome {
        CheckoutOutcome::Rejected(Rejection::ProductNotFound(id)) => assert_eq!(id, p2.id),
        other => panic!("expected ProductNotFound, got {other:?}"),
    }
    assert!(store.orders().await.is_empty());
    assert!(store.order_items().await.is_empty());
    assert_eq!(store.load_cart(user.session_id).await?.cart.len(), 2);

    let err = order_service::checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::ProductNotFound(id) if id == p2.id));
    Ok(())
}

#[tokio::test]
async fn storage_failure_writes_nothing_and_keeps_the_cart() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store.add_product("p1", "Widget", price("10.00"), None).await;
    let user = logged_in(&store, "erin").await;
    cart_service::add_to_cart(&state, &session_of(&user), "p1", form("2")).await?;

    store.fail_writes(true);
    let err = state.checkout.checkout(&user).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(store.orders().await.is_empty());
    assert!(store.order_items().await.is_empty());
    assert_eq!(
        store.load_cart(user.session_id).await?.cart.item_count(),
        2
    );

    store.fail_writes(false);
    let outcome = state.checkout.checkout(&user).await?;
    assert!(matches!(outcome, CheckoutOutcome::Committed(_)));
    assert_eq!(store.orders().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_checkouts_place_exactly_one_order() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store.add_product("p1", "Widget", price("10.00"), None).await;
    let user = logged_in(&store, "frank").await;
    cart_service::add_to_cart(&state, &session_of(&user), "p1", form("1")).await?;

    let (a, b) = tokio::join!(state.checkout.checkout(&user), state.checkout.checkout(&user));
    let outcomes = [a?, b?];

    let committed = outcomes
        .iter()
        .filter(|o| matches!(o, CheckoutOutcome::Committed(_)))
        .count();
    let empty = outcomes
        .iter()
        .filter(|o| matches!(o, CheckoutOutcome::Rejected(Rejection::EmptyCart)))
        .count();
    assert_eq!((committed, empty), (1, 1));
    assert_eq!(store.orders().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn separate_orchestrators_sharing_storage_place_one_order() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store.add_product("p1", "Widget", price("10.00"), None).await;
    let user = logged_in(&store, "grace").await;
    cart_service::add_to_cart(&state, &session_of(&user), "p1", form("4")).await?;

    let first = orchestrator(&store, Duration::from_secs(2));
    let second = orchestrator(&store, Duration::from_secs(2));
    let (a, b) = tokio::join!(first.checkout(&user), second.checkout(&user));
    let committed = [a?, b?]
        .iter()
        .filter(|o| matches!(o, CheckoutOutcome::Committed(_)))
        .count();

    assert_eq!(committed, 1);
    assert_eq!(store.orders().await.len(), 1);
    assert_eq!(store.order_items().await[0].quantity, 4);
    Ok(())
}

#[tokio::test]
async fn totals_are_exact_decimal() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store.add_product("pen", "Pen", price("19.99"), None).await;
    let user = logged_in(&store, "heidi").await;
    cart_service::add_to_cart(&state, &session_of(&user), "pen", form("3")).await?;

    let CheckoutOutcome::Committed(placed) = state.checkout.checkout(&user).await? else {
        panic!("checkout did not commit");
    };
    assert_eq!(placed.order.total.to_string(), "59.97");
    assert_eq!(items_total(&placed.items), placed.order.total);
    Ok(())
}

#[tokio::test]
async fn placed_orders_keep_purchase_time_prices() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    let p1 = store.add_product("p1", "Widget", price("10.00"), None).await;
    let user = logged_in(&store, "ivan").await;
    cart_service::add_to_cart(&state, &session_of(&user), "p1", form("2")).await?;

    let CheckoutOutcome::Committed(placed) = state.checkout.checkout(&user).await? else {
        panic!("checkout did not commit");
    };

    store.set_product_price(p1.id, price("99.00")).await;
    let reread = store.get_order(user.user_id, placed.order.id).await?;
    assert_eq!(reread.total, price("20.00"));
    assert_eq!(reread.items[0].unit_price, price("10.00"));

    store.remove_product(p1.id).await;
    let reread = store.get_order(user.user_id, placed.order.id).await?;
    assert_eq!(reread.items[0].product_name, "Widget");
    assert_eq!(reread.total, price("20.00"));
    Ok(())
}

#[tokio::test]
async fn checkout_timeout_is_retryable_and_writes_nothing() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store.add_product("p1", "Widget", price("10.00"), None).await;
    let user = logged_in(&store, "judy").await;
    cart_service::add_to_cart(&state, &session_of(&user), "p1", form("1")).await?;

    let slow = orchestrator(&store, Duration::from_millis(50));
    store.set_write_delay(Duration::from_millis(500));
    let err = slow.checkout(&user).await.unwrap_err();
    assert!(matches!(err, AppError::Timeout));
    assert!(err.is_retryable());
    assert!(store.orders().await.is_empty());
    assert_eq!(store.load_cart(user.session_id).await?.cart.len(), 1);

    store.set_write_delay(Duration::ZERO);
    let outcome = slow.checkout(&user).await?;
    assert!(matches!(outcome, CheckoutOutcome::Committed(_)));
    Ok(())
}

#[tokio::test]
async fn denormalized_session_entries_are_priced_from_the_catalog() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    let p1 = store.add_product("p1", "Widget", price("10.00"), None).await;
    let user = logged_in(&store, "kim").await;
    store
        .put_raw_cart(
            user.session_id,
            json!({
                (p1.id.to_string()): { "name": "Old name", "price": "1.00", "quantity": 2 },
                "not-a-product": 3
            }),
        )
        .await;

    let CheckoutOutcome::Committed(placed) = state.checkout.checkout(&user).await? else {
        panic!("checkout did not commit");
    };
    assert_eq!(placed.total, price("20.00"));
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].product_name, "Widget");
    assert_eq!(placed.total, Decimal::new(2000, 2));
    Ok(())
}

#[tokio::test]
async fn total_beyond_the_order_column_is_refused_as_invalid() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store
        .add_product("yacht", "Yacht", price("99999999.99"), None)
        .await;
    let user = logged_in(&store, "lena").await;
    let session = session_of(&user);
    cart_service::add_to_cart(&state, &session, "yacht", form("1000")).await?;

    let outcome = state.checkout.checkout(&user).await?;
    assert!(matches!(
        outcome,
        CheckoutOutcome::Rejected(Rejection::TotalTooLarge(total)) if total == price("99999999990.00")
    ));
    assert!(store.orders().await.is_empty());
    assert_eq!(store.load_cart(user.session_id).await?.cart.item_count(), 1000);

    let err = order_service::checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(!err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn lost_cart_race_is_retried_against_the_fresh_cart() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store.add_product("p1", "Widget", price("10.00"), None).await;
    let user = logged_in(&store, "mia").await;
    let session = session_of(&user);
    cart_service::add_to_cart(&state, &session, "p1", form("1")).await?;
    let before = store.load_cart(user.session_id).await?.version;

    store.lose_cart_races(2);
    let view = cart_service::add_to_cart(&state, &session, "p1", form("2"))
        .await?
        .into_data()
        .expect("cart");

    assert_eq!(view.item_count, 3);
    let after = store.load_cart(user.session_id).await?;
    assert_eq!(after.cart.item_count(), 3);
    // two rival bumps plus our own write
    assert_eq!(after.version, before + 3);
    Ok(())
}

#[tokio::test]
async fn cart_race_lost_three_times_is_a_conflict() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = memory_state(&store);
    store.add_product("p1", "Widget", price("10.00"), None).await;
    let user = logged_in(&store, "noah").await;
    let session = session_of(&user);
    cart_service::add_to_cart(&state, &session, "p1", form("1")).await?;

    store.lose_cart_races(3);
    let err = cart_service::add_to_cart(&state, &session, "p1", form("5"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(store.load_cart(user.session_id).await?.cart.item_count(), 1);

    cart_service::add_to_cart(&state, &session, "p1", form("5")).await?;
    assert_eq!(store.load_cart(user.session_id).await?.cart.item_count(), 6);
    Ok(())
}
