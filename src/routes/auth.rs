use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    dto::auth::{LoginRequest, LoginResponse, Profile, SignupRequest},
    error::AppResult,
    middleware::auth::{AuthUser, SessionContext},
    models::User,
    response::ApiResponse,
    routes::with_session,
    services::auth_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Create an account", body = ApiResponse<User>),
        (status = 400, description = "Invalid field"),
        (status = 409, description = "Username taken"),
    ),
    tag = "Auth"
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<User>>)> {
    let resp = auth_service::signup(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    post,
    path = "/login",
    params(
        ("x-session-id" = Option<String>, Header, description = "Anonymous session whose cart is carried over")
    ),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login; the response header carries the new session id", body = ApiResponse<LoginResponse>),
        (status = 400, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    session: SessionContext,
    Json(payload): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let resp = auth_service::login(&state, &session, payload).await?;
    let session_id = resp
        .data
        .as_ref()
        .map_or(session.session_id, |login| login.session_id);
    Ok(with_session(session_id, resp))
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "End the current session", body = ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    session: SessionContext,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = auth_service::logout(&state, &session).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current user's profile", body = ApiResponse<Profile>),
        (status = 401, description = "Login required"),
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<Profile>>> {
    let resp = auth_service::profile(&state, &user).await?;
    Ok(Json(resp))
}
