use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::LockType;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::{
    dto::products::ProductList,
    entity::products::{Column, Entity as Products, Model as ProductModel},
    error::{AppError, AppResult},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

/// Read-only product lookup. Absent ids and slugs surface as [`AppError::NotFound`].
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, id: Uuid) -> AppResult<Product>;

    async fn get_product_by_slug(&self, slug: &str) -> AppResult<Product>;

    /// One page of products matching `query`, plus the total number of matches.
    async fn list_products(&self, query: &ProductQuery) -> AppResult<(Vec<Product>, i64)>;

    /// Products for the given ids; ids with no product are simply absent from the result.
    async fn find_products(&self, ids: &[Uuid]) -> AppResult<Vec<Product>>;
}

#[derive(Clone)]
pub struct SeaOrmCatalog {
    orm: DatabaseConnection,
}

impl SeaOrmCatalog {
    pub fn new(orm: DatabaseConnection) -> Self {
        Self { orm }
    }
}

#[async_trait]
impl CatalogStore for SeaOrmCatalog {
    async fn get_product(&self, id: Uuid) -> AppResult<Product> {
        let product = Products::find_by_id(id)
            .one(&self.orm)
            .await?
            .map(product_from_entity);
        product.ok_or(AppError::NotFound)
    }

    async fn get_product_by_slug(&self, slug: &str) -> AppResult<Product> {
        let product = Products::find()
            .filter(Column::Slug.eq(slug))
            .one(&self.orm)
            .await?
            .map(product_from_entity);
        product.ok_or(AppError::NotFound)
    }

    async fn list_products(&self, query: &ProductQuery) -> AppResult<(Vec<Product>, i64)> {
        let (_, limit, offset) = query.pagination().normalize();
        let mut condition = Condition::all();

        if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search);
            condition = condition.add(
                Condition::any()
                    .add(Expr::col(Column::Name).ilike(pattern.clone()))
                    .add(Expr::col(Column::Description).ilike(pattern)),
            );
        }

        if let Some(category) = query.category.as_ref().filter(|c| !c.is_empty()) {
            condition = condition.add(Column::Category.eq(category.clone()));
        }

        if let Some(min_price) = query.min_price {
            condition = condition.add(Column::Price.gte(min_price));
        }

        if let Some(max_price) = query.max_price {
            condition = condition.add(Column::Price.lte(max_price));
        }

        let sort_col = match query.sort_by.unwrap_or(ProductSortBy::CreatedAt) {
            ProductSortBy::CreatedAt => Column::CreatedAt,
            ProductSortBy::Price => Column::Price,
            ProductSortBy::Name => Column::Name,
        };

        let mut finder = Products::find().filter(condition);
        finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
            SortOrder::Asc => finder.order_by_asc(sort_col),
            SortOrder::Desc => finder.order_by_desc(sort_col),
        };

        let total = finder.clone().count(&self.orm).await? as i64;

        let items = finder
            .limit(limit as u64)
            .offset(offset as u64)
            .all(&self.orm)
            .await?
            .into_iter()
            .map(product_from_entity)
            .collect();

        Ok((items, total))
    }

    async fn find_products(&self, ids: &[Uuid]) -> AppResult<Vec<Product>> {
        Ok(find_products_in(&self.orm, ids, None).await?)
    }
}

/// Shared by the catalog and the checkout transaction, which reads under a share lock.
pub(crate) async fn find_products_in<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
    lock: Option<LockType>,
) -> Result<Vec<Product>, DbErr> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut finder = Products::find().filter(Column::Id.is_in(ids.to_vec()));
    if let Some(lock) = lock {
        finder = finder.lock(lock);
    }
    let products = finder
        .all(conn)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();
    Ok(products)
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, _) = query.pagination().normalize();
    let (items, total) = state.catalog.list_products(&query).await?;
    let meta = Meta::paged(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, meta))
}

pub async fn get_product(state: &AppState, slug: &str) -> AppResult<ApiResponse<Product>> {
    let product = state.catalog.get_product_by_slug(slug).await?;
    Ok(ApiResponse::plain("Product", product))
}

pub(crate) fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        slug: model.slug,
        name: model.name,
        description: model.description,
        price: model.price,
        category: model.category,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
