use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::response::{ApiResponse, Meta};

pub const LOGIN_PATH: &str = "/login";
pub const CATALOG_PATH: &str = "/products";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {0} is no longer available")]
    ProductNotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Storage timed out")]
    Timeout,

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Storage failures leave the cart untouched and can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Timeout
        )
    }

    fn redirect(&self) -> Option<&'static str> {
        match self {
            AppError::Unauthenticated => Some(LOGIN_PATH),
            AppError::EmptyCart => Some(CATALOG_PATH),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_id: Option<Uuid>,
    retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::EmptyCart => StatusCode::SEE_OTHER,
            AppError::ProductNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Timeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            AppError::DbError(err) => tracing::error!(error = %err, "database failure"),
            AppError::OrmError(err) => tracing::error!(error = %err, "database failure"),
            AppError::Internal(err) => tracing::error!(error = %err, "internal failure"),
            _ => {}
        }

        let redirect = self.redirect();
        let product_id = match &self {
            AppError::ProductNotFound(id) => Some(*id),
            _ => None,
        };

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
                redirect,
                product_id,
                retryable: self.is_retryable(),
            }),
            meta: Some(Meta::default()),
        };

        match redirect {
            Some(location) if status.is_redirection() => {
                (status, [(header::LOCATION, location)], axum::Json(body)).into_response()
            }
            _ => (status, axum::Json(body)).into_response(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
