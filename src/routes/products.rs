use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};

use crate::{
    dto::{cart::AddToCartForm, products::ProductList},
    error::AppResult,
    middleware::auth::SessionContext,
    models::Product,
    pricing::CartView,
    response::ApiResponse,
    routes::{params::ProductQuery, with_session},
    services::{cart_service, catalog_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/{slug}", get(get_product).post(add_to_cart))
}

#[utoipa::path(
    get,
    path = "/products",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("q" = Option<String>, Query, description = "Search in name or description"),
        ("category" = Option<String>, Query, description = "Exact category"),
        ("min_price" = Option<String>, Query, description = "Lowest price, decimal"),
        ("max_price" = Option<String>, Query, description = "Highest price, decimal"),
        ("sort_by" = Option<String>, Query, description = "Sort by: created_at, price, name"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "List products", body = ApiResponse<ProductList>)
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> AppResult<Json<ApiResponse<ProductList>>> {
    let resp = catalog_service::list_products(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/products/{slug}",
    params(
        ("slug" = String, Path, description = "Product slug")
    ),
    responses(
        (status = 200, description = "Get product", body = ApiResponse<Product>),
        (status = 404, description = "Product not found"),
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let resp = catalog_service::get_product(&state, &slug).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/products/{slug}",
    params(
        ("slug" = String, Path, description = "Product slug"),
        ("x-session-id" = Option<String>, Header, description = "Session id; minted when absent")
    ),
    request_body(content = AddToCartForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Add the product to the session cart", body = ApiResponse<CartView>),
        (status = 400, description = "Quantity is not a positive integer"),
        (status = 404, description = "Product not found"),
    ),
    tag = "Products"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    session: SessionContext,
    Path(slug): Path<String>,
    Form(form): Form<AddToCartForm>,
) -> AppResult<impl IntoResponse> {
    let resp = cart_service::add_to_cart(&state, &session, &slug, form).await?;
    Ok(with_session(session.session_id, resp))
}
