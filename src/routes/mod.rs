use axum::{Json, Router, response::IntoResponse, routing::post};
use serde::Serialize;
use uuid::Uuid;

use crate::{middleware::auth::SESSION_HEADER, response::ApiResponse, state::AppState};

pub mod auth;
pub mod cart;
pub mod doc;
pub mod health;
pub mod orders;
pub mod params;
pub mod products;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/products", products::router())
        .nest("/cart", cart::router())
        .nest("/orders", orders::router())
        .route("/checkout", post(orders::checkout))
        .merge(auth::router())
}

/// JSON body plus the `x-session-id` header the client should send next time.
pub fn with_session<T: Serialize>(session_id: Uuid, body: ApiResponse<T>) -> impl IntoResponse {
    ([(SESSION_HEADER, session_id.to_string())], Json(body))
}
