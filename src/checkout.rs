//! Checkout orchestration.
//!
//! A checkout turns the caller's session cart into one `Order` plus its
//! `OrderItem`s and empties the cart, all inside a single [`CheckoutTx`].
//! Either every write lands or none does. Two checkouts for the same session
//! are serialized by [`SessionLocks`] in-process and by the cart row lock in
//! storage, so a cart can only ever be ordered once.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    cart::Cart,
    dto::orders::OrderWithItems,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    pricing::{PricingMode, index_products, price_lines},
    services::{
        cart_service::SessionStore,
        order_service::{CheckoutTx, NewOrder, NewOrderItem, OrderStore},
    },
};

/// Largest total `orders.total NUMERIC(12, 2)` can hold.
pub const MAX_ORDER_TOTAL: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Reasons a checkout is refused before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    EmptyCart,
    ProductNotFound(Uuid),
    InvalidQuantity(Uuid),
    TotalTooLarge(Decimal),
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::EmptyCart => AppError::EmptyCart,
            Rejection::ProductNotFound(id) => AppError::ProductNotFound(id),
            Rejection::InvalidQuantity(id) => {
                AppError::Validation(format!("invalid quantity for product {id}"))
            }
            Rejection::TotalTooLarge(total) => AppError::Validation(format!(
                "order total {total} exceeds the limit of {MAX_ORDER_TOTAL}"
            )),
        }
    }
}

#[derive(Debug)]
pub enum CheckoutOutcome {
    Committed(OrderWithItems),
    Rejected(Rejection),
}

/// One async mutex per session id, created on demand and dropped with its last holder.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

pub struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    session_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: Uuid) -> SessionGuard<'_> {
        let lock = self
            .locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        SessionGuard {
            locks: self,
            session_id,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // Release first so a waiter holding a clone can proceed.
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct CheckoutOrchestrator {
    sessions: Arc<dyn SessionStore>,
    orders: Arc<dyn OrderStore>,
    locks: SessionLocks,
    timeout: Duration,
}

impl CheckoutOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        orders: Arc<dyn OrderStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            orders,
            locks: SessionLocks::new(),
            timeout,
        }
    }

    /// Places an order for everything in the caller's cart.
    ///
    /// Rejections leave storage untouched. Storage failures and timeouts come
    /// back as errors, also with storage untouched and the cart intact.
    pub async fn checkout(&self, user: &AuthUser) -> AppResult<CheckoutOutcome> {
        let _guard = self.locks.acquire(user.session_id).await;

        let snapshot = self.sessions.load_cart(user.session_id).await?;
        if snapshot.cart.is_empty() {
            tracing::info!(session_id = %user.session_id, "checkout refused, cart is empty");
            return Ok(CheckoutOutcome::Rejected(Rejection::EmptyCart));
        }

        tracing::info!(
            session_id = %user.session_id,
            lines = snapshot.cart.len(),
            "validating cart for checkout"
        );
        match tokio::time::timeout(self.timeout, self.run(user, snapshot.version)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    session_id = %user.session_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "checkout timed out, nothing was written"
                );
                Err(AppError::Timeout)
            }
        }
    }

    async fn run(&self, user: &AuthUser, seen_version: i64) -> AppResult<CheckoutOutcome> {
        let mut tx = self.orders.begin_checkout(self.timeout).await?;
        match place_order(tx.as_mut(), user, seen_version).await {
            Ok(Ok(placed)) => {
                tx.commit().await?;
                tracing::info!(
                    order_id = %placed.order.id,
                    user_id = %user.user_id,
                    total = %placed.total,
                    lines = placed.items.len(),
                    "order placed"
                );
                Ok(CheckoutOutcome::Committed(placed))
            }
            Ok(Err(rejection)) => {
                tx.rollback().await?;
                tracing::info!(session_id = %user.session_id, ?rejection, "checkout rejected");
                Ok(CheckoutOutcome::Rejected(rejection))
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "checkout rollback failed");
                }
                tracing::warn!(session_id = %user.session_id, error = %err, "checkout failed");
                Err(err)
            }
        }
    }
}

async fn place_order(
    tx: &mut dyn CheckoutTx,
    user: &AuthUser,
    seen_version: i64,
) -> AppResult<Result<OrderWithItems, Rejection>> {
    let locked = tx.lock_cart(user.session_id).await?;
    if locked.version != seen_version {
        tracing::warn!(
            session_id = %user.session_id,
            seen_version,
            locked_version = locked.version,
            "cart changed under checkout, validating the locked copy"
        );
    }
    let cart: Cart = locked.cart;
    if cart.is_empty() {
        return Ok(Err(Rejection::EmptyCart));
    }

    let products = index_products(tx.find_products(&cart.product_ids()).await?);
    let view = match price_lines(&cart, &products, PricingMode::Checkout) {
        Ok(view) => view,
        Err(rejection) => return Ok(Err(rejection)),
    };
    if view.total > MAX_ORDER_TOTAL {
        return Ok(Err(Rejection::TotalTooLarge(view.total)));
    }

    let order_id = Uuid::new_v4();
    let mut items = Vec::with_capacity(view.lines.len());
    for line in &view.lines {
        let quantity = match i32::try_from(line.quantity) {
            Ok(q) => q,
            Err(_) => return Ok(Err(Rejection::InvalidQuantity(line.product_id))),
        };
        items.push(NewOrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id: line.product_id,
            product_name: line.name.clone(),
            unit_price: line.unit_price,
            quantity,
        });
    }

    let order = tx
        .create_order(NewOrder {
            id: order_id,
            user_id: user.user_id,
            total: view.total,
        })
        .await?;
    let items = tx.create_order_items(items).await?;
    tx.clear_cart(user.session_id).await?;

    Ok(Ok(OrderWithItems::new(order, items)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_lock_is_released_after_last_holder() {
        let locks = SessionLocks::new();
        let sid = Uuid::new_v4();
        {
            let _guard = locks.acquire(sid).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_sessions_do_not_block_each_other() {
        let locks = SessionLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn rejection_maps_to_http_errors() {
        let id = Uuid::new_v4();
        assert!(matches!(AppError::from(Rejection::EmptyCart), AppError::EmptyCart));
        assert!(matches!(
            AppError::from(Rejection::ProductNotFound(id)),
            AppError::ProductNotFound(got) if got == id
        ));
        assert!(matches!(
            AppError::from(Rejection::InvalidQuantity(id)),
            AppError::Validation(_)
        ));
        assert!(matches!(
            AppError::from(Rejection::TotalTooLarge(MAX_ORDER_TOTAL)),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn order_total_limit_matches_the_column() {
        assert_eq!(MAX_ORDER_TOTAL.to_string(), "9999999999.99");
    }
}
