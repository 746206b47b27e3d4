//! Process-local storage implementing every store trait.
//!
//! Used for tests and local runs without Postgres. A checkout unit holds the
//! whole store exclusively and works on a staged copy, which replaces the live
//! state only on commit.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DbErr;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    audit::AuditLog,
    cart::Cart,
    dto::orders::OrderWithItems,
    error::{AppError, AppResult},
    models::{AuditEntry, Order, OrderItem, Product, User},
    routes::params::{Pagination, ProductQuery, ProductSortBy, SortOrder},
    services::{
        auth_service::{NewUser, UserStore},
        cart_service::{CartSnapshot, SessionStore},
        catalog_service::CatalogStore,
        order_service::{CheckoutTx, NewOrder, NewOrderItem, OrderStore},
    },
};

#[derive(Debug, Clone)]
struct StoredSession {
    cart: Value,
    version: i64,
    user_id: Option<Uuid>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    fn anonymous() -> Self {
        Self {
            cart: Value::Object(Default::default()),
            version: 0,
            user_id: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, StoredSession>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
    audit: Vec<AuditEntry>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    checkouts_begun: AtomicUsize,
    lost_cart_races: AtomicUsize,
}

impl Faults {
    async fn before_write(&self) -> AppResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::OrmError(DbErr::Custom(
                "storage rejected the write".into(),
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_product(
        &self,
        slug: &str,
        name: &str,
        price: Decimal,
        category: Option<&str>,
    ) -> Product {
        let product = Product {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: name.to_string(),
            description: String::new(),
            price,
            category: category.map(str::to_string),
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .products
            .insert(product.id, product.clone());
        product
    }

    pub async fn remove_product(&self, id: Uuid) -> bool {
        self.state.lock().await.products.remove(&id).is_some()
    }

    pub async fn set_product_price(&self, id: Uuid, price: Decimal) -> bool {
        match self.state.lock().await.products.get_mut(&id) {
            Some(product) => {
                product.price = price;
                true
            }
            None => false,
        }
    }

    /// Stores `cart` verbatim, bypassing normalization.
    pub async fn put_raw_cart(&self, session_id: Uuid, cart: Value) {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .entry(session_id)
            .or_insert_with(StoredSession::anonymous);
        session.cart = cart;
        session.version += 1;
    }

    pub async fn raw_cart(&self, session_id: Uuid) -> Option<Value> {
        self.state
            .lock()
            .await
            .sessions
            .get(&session_id)
            .map(|s| s.cart.clone())
    }

    /// Makes every checkout write fail until switched off.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stalls every checkout write by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        self.faults
            .write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Lets a rival writer bump the session version ahead of each of the next `n` cart writes.
    pub fn lose_cart_races(&self, n: usize) {
        self.faults.lost_cart_races.store(n, Ordering::SeqCst);
    }

    pub fn checkouts_begun(&self) -> usize {
        self.faults.checkouts_begun.load(Ordering::SeqCst)
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.clone()
    }

    pub async fn order_items(&self) -> Vec<OrderItem> {
        self.state.lock().await.order_items.clone()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }
}

fn matches_query(product: &Product, query: &ProductQuery) -> bool {
    if let Some(q) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let needle = q.to_lowercase();
        if !product.name.to_lowercase().contains(&needle)
            && !product.description.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    if let Some(category) = query.category.as_ref().filter(|c| !c.is_empty()) {
        if product.category.as_deref() != Some(category.as_str()) {
            return false;
        }
    }
    if query.min_price.is_some_and(|min| product.price < min) {
        return false;
    }
    if query.max_price.is_some_and(|max| product.price > max) {
        return false;
    }
    true
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_product(&self, id: Uuid) -> AppResult<Product> {
        self.state
            .lock()
            .await
            .products
            .get(&id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn get_product_by_slug(&self, slug: &str) -> AppResult<Product> {
        self.state
            .lock()
            .await
            .products
            .values()
            .find(|p| p.slug == slug)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn list_products(&self, query: &ProductQuery) -> AppResult<(Vec<Product>, i64)> {
        let (_, limit, offset) = query.pagination().normalize();
        let mut matched: Vec<Product> = self
            .state
            .lock()
            .await
            .products
            .values()
            .filter(|p| matches_query(p, query))
            .cloned()
            .collect();

        match query.sort_by.unwrap_or(ProductSortBy::CreatedAt) {
            ProductSortBy::CreatedAt => matched.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            ProductSortBy::Price => matched.sort_by(|a, b| a.price.cmp(&b.price)),
            ProductSortBy::Name => matched.sort_by(|a, b| a.name.cmp(&b.name)),
        }
        if query.sort_order.unwrap_or(SortOrder::Desc) == SortOrder::Desc {
            matched.reverse();
        }

        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn find_products(&self, ids: &[Uuid]) -> AppResult<Vec<Product>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_cart(&self, session_id: Uuid) -> AppResult<CartSnapshot> {
        let now = Utc::now();
        let state = self.state.lock().await;
        Ok(match state.sessions.get(&session_id) {
            Some(s) if s.expires_at.is_some_and(|at| at <= now) => CartSnapshot {
                version: s.version,
                ..CartSnapshot::default()
            },
            Some(s) => CartSnapshot::from_stored(&s.cart, s.version),
            None => CartSnapshot::default(),
        })
    }

    async fn store_cart(
        &self,
        session_id: Uuid,
        cart: &Cart,
        expected_version: i64,
        anonymous_expiry: DateTime<Utc>,
    ) -> AppResult<i64> {
        let mut state = self.state.lock().await;
        let rival = self
            .faults
            .lost_cart_races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rival {
            state
                .sessions
                .entry(session_id)
                .or_insert_with(StoredSession::anonymous)
                .version += 1;
        }

        let session = state
            .sessions
            .entry(session_id)
            .or_insert_with(StoredSession::anonymous);
        if session.version != expected_version {
            return Err(AppError::Conflict(
                "cart was modified by another request".to_string(),
            ));
        }
        session.cart = cart.to_session_value();
        session.version += 1;
        if session.user_id.is_none() {
            session.expires_at = Some(anonymous_expiry);
        }
        Ok(session.version)
    }

    async fn bind_user(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .entry(session_id)
            .or_insert_with(StoredSession::anonymous);
        session.user_id = Some(user_id);
        session.expires_at = Some(expires_at);
        Ok(())
    }

    async fn session_user(&self, session_id: Uuid) -> AppResult<Option<Uuid>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        Ok(state.sessions.get(&session_id).and_then(|s| {
            match (s.user_id, s.expires_at) {
                (Some(user_id), Some(expires_at)) if expires_at > now => Some(user_id),
                _ => None,
            }
        }))
    }

    async fn session_owner(&self, session_id: Uuid) -> AppResult<Option<Uuid>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(&session_id).and_then(|s| s.user_id))
    }

    async fn end_session(&self, session_id: Uuid) -> AppResult<()> {
        self.state.lock().await.sessions.remove(&session_id);
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state
            .sessions
            .retain(|_, s| !s.expires_at.is_some_and(|at| at <= now));
        Ok((before - state.sessions.len()) as u64)
    }
}

pub struct MemoryCheckoutTx {
    live: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    faults: Arc<Faults>,
}

#[async_trait]
impl CheckoutTx for MemoryCheckoutTx {
    async fn lock_cart(&mut self, session_id: Uuid) -> AppResult<CartSnapshot> {
        Ok(match self.staged.sessions.get(&session_id) {
            Some(s) => CartSnapshot::from_stored(&s.cart, s.version),
            None => CartSnapshot::default(),
        })
    }

    async fn find_products(&mut self, ids: &[Uuid]) -> AppResult<Vec<Product>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.products.get(id).cloned())
            .collect())
    }

    async fn create_order(&mut self, order: NewOrder) -> AppResult<Order> {
        self.faults.before_write().await?;
        let order = Order {
            id: order.id,
            user_id: order.user_id,
            total: order.total,
            paid: false,
            created_at: Utc::now(),
        };
        self.staged.orders.push(order.clone());
        Ok(order)
    }

    async fn create_order_items(&mut self, items: Vec<NewOrderItem>) -> AppResult<Vec<OrderItem>> {
        self.faults.before_write().await?;
        let items: Vec<OrderItem> = items.into_iter().map(OrderItem::from).collect();
        self.staged.order_items.extend(items.iter().cloned());
        Ok(items)
    }

    async fn clear_cart(&mut self, session_id: Uuid) -> AppResult<()> {
        self.faults.before_write().await?;
        if let Some(session) = self.staged.sessions.get_mut(&session_id) {
            session.cart = Value::Object(Default::default());
            session.version += 1;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryCheckoutTx {
            mut live, staged, ..
        } = *self;
        *live = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn begin_checkout(&self, _timeout: Duration) -> AppResult<Box<dyn CheckoutTx>> {
        let live = self.state.clone().lock_owned().await;
        self.faults.checkouts_begun.fetch_add(1, Ordering::SeqCst);
        let staged = live.clone();
        Ok(Box::new(MemoryCheckoutTx {
            live,
            staged,
            faults: self.faults.clone(),
        }))
    }

    async fn list_orders(
        &self,
        user_id: Uuid,
        pagination: &Pagination,
    ) -> AppResult<(Vec<Order>, i64)> {
        let (_, limit, offset) = pagination.normalize();
        let state = self.state.lock().await;
        let mut mine: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = mine.len() as i64;
        let page = mine
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> AppResult<OrderWithItems> {
        let state = self.state.lock().await;
        let order = state
            .orders
            .iter()
            .find(|o| o.id == order_id && o.user_id == user_id)
            .cloned()
            .ok_or(AppError::NotFound)?;
        let items = state
            .order_items
            .iter()
            .filter(|i| i.order_id == order.id)
            .cloned()
            .collect();
        Ok(OrderWithItems::new(order, items))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn create(&self, user: NewUser) -> AppResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(AppError::Conflict("Username is already taken".into()));
        }
        let user = User {
            id: user.id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            bio: String::new(),
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn record(&self, entry: AuditEntry) -> AppResult<()> {
        self.state.lock().await.audit.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_cart_write_is_a_conflict() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(Uuid::new_v4(), 1).unwrap();

        let v1 = store.store_cart(sid, &cart, 0, later()).await.unwrap();
        assert_eq!(v1, 1);
        let err = store.store_cart(sid, &cart, 0, later()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.store_cart(sid, &cart, v1, later()).await.unwrap(), 2);
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(1)
    }

    #[tokio::test]
    async fn expired_anonymous_cart_reads_empty_and_is_purged() {
        let store = MemoryStore::new();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(Uuid::new_v4(), 2).unwrap();

        let past = Utc::now() - chrono::Duration::minutes(1);
        store.store_cart(stale, &cart, 0, past).await.unwrap();
        store.store_cart(fresh, &cart, 0, later()).await.unwrap();

        let snapshot = store.load_cart(stale).await.unwrap();
        assert!(snapshot.cart.is_empty());
        assert_eq!(snapshot.version, 1);
        // still writable at the version it was read at
        assert_eq!(store.store_cart(stale, &cart, 1, past).await.unwrap(), 2);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.raw_cart(stale).await.is_none());
        assert_eq!(store.load_cart(fresh).await.unwrap().cart.item_count(), 2);
    }

    #[tokio::test]
    async fn cart_writes_keep_a_bound_session_expiry() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let user = Uuid::new_v4();
        store.bind_user(sid, user, later()).await.unwrap();

        let mut cart = Cart::new();
        cart.add_item(Uuid::new_v4(), 1).unwrap();
        let past = Utc::now() - chrono::Duration::minutes(1);
        store.store_cart(sid, &cart, 0, past).await.unwrap();

        assert_eq!(store.session_user(sid).await.unwrap(), Some(user));
        assert_eq!(store.session_owner(sid).await.unwrap(), Some(user));
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_session_has_no_user() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let user = Uuid::new_v4();
        store
            .bind_user(sid, user, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(store.session_user(sid).await.unwrap(), None);

        store
            .bind_user(sid, user, Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(store.session_user(sid).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn dropped_checkout_leaves_nothing_behind() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin_checkout(Duration::from_secs(1)).await.unwrap();
            tx.create_order(NewOrder {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                total: Decimal::ONE,
            })
            .await
            .unwrap();
        }
        assert!(store.orders().await.is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_category_and_price() {
        let store = MemoryStore::new();
        store
            .add_product("mug", "Mug", Decimal::new(800, 2), Some("kitchen"))
            .await;
        store
            .add_product("pan", "Pan", Decimal::new(3500, 2), Some("kitchen"))
            .await;
        store
            .add_product("lamp", "Lamp", Decimal::new(2000, 2), Some("living"))
            .await;

        let query = ProductQuery {
            category: Some("kitchen".into()),
            max_price: Some(Decimal::new(1000, 2)),
            ..Default::default()
        };
        let (items, total) = store.list_products(&query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].slug, "mug");
    }
}
