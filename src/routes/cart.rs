use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
};
use uuid::Uuid;

use crate::{
    dto::cart::SetCartItemRequest,
    error::AppResult,
    middleware::auth::SessionContext,
    pricing::CartView,
    response::ApiResponse,
    routes::with_session,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(view_cart).delete(clear_cart))
        .route("/{product_id}", put(set_cart_item).delete(remove_from_cart))
}

#[utoipa::path(
    get,
    path = "/cart",
    params(
        ("x-session-id" = Option<String>, Header, description = "Session id; minted when absent")
    ),
    responses(
        (status = 200, description = "Priced view of the session cart", body = ApiResponse<CartView>)
    ),
    tag = "Cart"
)]
pub async fn view_cart(
    State(state): State<AppState>,
    session: SessionContext,
) -> AppResult<impl IntoResponse> {
    let resp = cart_service::view_cart(&state, &session).await?;
    Ok(with_session(session.session_id, resp))
}

#[utoipa::path(
    put,
    path = "/cart/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID"),
        ("x-session-id" = Option<String>, Header, description = "Session id; minted when absent")
    ),
    request_body = SetCartItemRequest,
    responses(
        (status = 200, description = "Set the line quantity; zero or less removes it", body = ApiResponse<CartView>),
        (status = 404, description = "Product not found"),
        (status = 409, description = "Concurrent cart update"),
    ),
    tag = "Cart"
)]
pub async fn set_cart_item(
    State(state): State<AppState>,
    session: SessionContext,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<SetCartItemRequest>,
) -> AppResult<impl IntoResponse> {
    let resp = cart_service::set_cart_item(&state, &session, product_id, payload).await?;
    Ok(with_session(session.session_id, resp))
}

#[utoipa::path(
    delete,
    path = "/cart/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID"),
        ("x-session-id" = Option<String>, Header, description = "Session id; minted when absent")
    ),
    responses(
        (status = 200, description = "Remove the line if present", body = ApiResponse<CartView>),
    ),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    session: SessionContext,
    Path(product_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let resp = cart_service::remove_from_cart(&state, &session, product_id).await?;
    Ok(with_session(session.session_id, resp))
}

#[utoipa::path(
    delete,
    path = "/cart",
    params(
        ("x-session-id" = Option<String>, Header, description = "Session id; minted when absent")
    ),
    responses(
        (status = 200, description = "Empty the cart", body = ApiResponse<CartView>),
    ),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    session: SessionContext,
) -> AppResult<impl IntoResponse> {
    let resp = cart_service::clear_cart(&state, &session).await?;
    Ok(with_session(session.session_id, resp))
}
