use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    Statement, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    checkout::CheckoutOutcome,
    dto::orders::{OrderList, OrderWithItems},
    entity::{
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        sessions::{Column as SessionCol, Entity as Sessions},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, Product},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::{cart_service::CartSnapshot, catalog_service::find_products_in},
    state::AppState,
};

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// One all-or-nothing checkout unit of work.
///
/// Nothing written through it is visible to anyone else until [`CheckoutTx::commit`].
/// Dropping it without committing discards every write.
#[async_trait]
pub trait CheckoutTx: Send {
    /// Reads the session's cart and holds it exclusively until the unit ends.
    async fn lock_cart(&mut self, session_id: Uuid) -> AppResult<CartSnapshot>;

    /// Reads products once; their prices cannot change until the unit ends.
    async fn find_products(&mut self, ids: &[Uuid]) -> AppResult<Vec<Product>>;

    async fn create_order(&mut self, order: NewOrder) -> AppResult<Order>;

    async fn create_order_items(&mut self, items: Vec<NewOrderItem>) -> AppResult<Vec<OrderItem>>;

    /// Empties the session's cart (the session itself survives).
    async fn clear_cart(&mut self, session_id: Uuid) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Starts a checkout unit whose statements may not run longer than `timeout`.
    async fn begin_checkout(&self, timeout: Duration) -> AppResult<Box<dyn CheckoutTx>>;

    async fn list_orders(&self, user_id: Uuid, pagination: &Pagination) -> AppResult<(Vec<Order>, i64)>;

    async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> AppResult<OrderWithItems>;
}

#[derive(Clone)]
pub struct SeaOrmOrderStore {
    orm: DatabaseConnection,
}

impl SeaOrmOrderStore {
    pub fn new(orm: DatabaseConnection) -> Self {
        Self { orm }
    }
}

#[async_trait]
impl OrderStore for SeaOrmOrderStore {
    async fn begin_checkout(&self, timeout: Duration) -> AppResult<Box<dyn CheckoutTx>> {
        let txn = self.orm.begin().await?;
        let backend = txn.get_database_backend();
        let ms = timeout.as_millis();
        txn.execute(Statement::from_string(
            backend,
            format!("SET LOCAL statement_timeout = {ms}"),
        ))
        .await?;
        txn.execute(Statement::from_string(
            backend,
            format!("SET LOCAL lock_timeout = {ms}"),
        ))
        .await?;
        Ok(Box::new(SeaOrmCheckoutTx { txn }))
    }

    async fn list_orders(
        &self,
        user_id: Uuid,
        pagination: &Pagination,
    ) -> AppResult<(Vec<Order>, i64)> {
        let (_, limit, offset) = pagination.normalize();
        let finder = Orders::find()
            .filter(OrderCol::UserId.eq(user_id))
            .order_by_desc(OrderCol::CreatedAt);

        let total = finder.clone().count(&self.orm).await? as i64;

        let orders = finder
            .limit(limit as u64)
            .offset(offset as u64)
            .all(&self.orm)
            .await?
            .into_iter()
            .map(order_from_entity)
            .collect();

        Ok((orders, total))
    }

    async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> AppResult<OrderWithItems> {
        let order = Orders::find()
            .filter(
                Condition::all()
                    .add(OrderCol::UserId.eq(user_id))
                    .add(OrderCol::Id.eq(order_id)),
            )
            .one(&self.orm)
            .await?;
        let order = match order {
            Some(o) => o,
            None => return Err(AppError::NotFound),
        };

        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order.id))
            .all(&self.orm)
            .await?
            .into_iter()
            .map(order_item_from_entity)
            .collect();

        Ok(OrderWithItems::new(order_from_entity(order), items))
    }
}

pub struct SeaOrmCheckoutTx {
    txn: DatabaseTransaction,
}

#[async_trait]
impl CheckoutTx for SeaOrmCheckoutTx {
    async fn lock_cart(&mut self, session_id: Uuid) -> AppResult<CartSnapshot> {
        let session = Sessions::find_by_id(session_id)
            .lock(LockType::Update)
            .one(&self.txn)
            .await?;
        Ok(match session {
            Some(s) => CartSnapshot::from_stored(&s.cart, s.version),
            None => CartSnapshot::default(),
        })
    }

    async fn find_products(&mut self, ids: &[Uuid]) -> AppResult<Vec<Product>> {
        Ok(find_products_in(&self.txn, ids, Some(LockType::Share)).await?)
    }

    async fn create_order(&mut self, order: NewOrder) -> AppResult<Order> {
        let order = OrderActive {
            id: Set(order.id),
            user_id: Set(order.user_id),
            total: Set(order.total),
            paid: Set(false),
            created_at: NotSet,
        }
        .insert(&self.txn)
        .await?;
        Ok(order_from_entity(order))
    }

    async fn create_order_items(&mut self, items: Vec<NewOrderItem>) -> AppResult<Vec<OrderItem>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let rows = items.iter().map(|item| OrderItemActive {
            id: Set(item.id),
            order_id: Set(item.order_id),
            product_id: Set(item.product_id),
            product_name: Set(item.product_name.clone()),
            unit_price: Set(item.unit_price),
            quantity: Set(item.quantity),
        });
        OrderItems::insert_many(rows).exec(&self.txn).await?;
        Ok(items.into_iter().map(OrderItem::from).collect())
    }

    async fn clear_cart(&mut self, session_id: Uuid) -> AppResult<()> {
        Sessions::update_many()
            .col_expr(SessionCol::Cart, Expr::value(serde_json::json!({})))
            .col_expr(SessionCol::Version, Expr::col(SessionCol::Version).add(1))
            .col_expr(SessionCol::UpdatedAt, Expr::value(Utc::now()))
            .filter(SessionCol::Id.eq(session_id))
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}

impl From<NewOrderItem> for OrderItem {
    fn from(item: NewOrderItem) -> Self {
        OrderItem {
            id: item.id,
            order_id: item.order_id,
            product_id: item.product_id,
            product_name: item.product_name,
            unit_price: item.unit_price,
            quantity: item.quantity,
        }
    }
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, _) = pagination.normalize();
    let (orders, total) = state.orders.list_orders(user.user_id, &pagination).await?;
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Meta::paged(page, limit, total),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = state.orders.get_order(user.user_id, id).await?;
    Ok(ApiResponse::plain("OK", order))
}

pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let placed = match state.checkout.checkout(user).await? {
        CheckoutOutcome::Committed(placed) => placed,
        CheckoutOutcome::Rejected(rejection) => return Err(rejection.into()),
    };

    if let Err(err) = log_audit(
        state.audit.as_ref(),
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": placed.order.id, "total": placed.total })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::plain("Checkout success", placed))
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        total: model.total,
        paid: model.paid,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: model.product_name,
        unit_price: model.unit_price,
        quantity: model.quantity,
    }
}
