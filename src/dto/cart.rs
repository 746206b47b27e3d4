use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

/// Form body of `POST /products/{slug}`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AddToCartForm {
    pub quantity: Option<String>,
}

impl AddToCartForm {
    /// Raw integer as submitted; a missing field means one unit.
    pub fn quantity(&self) -> AppResult<i64> {
        match self.quantity.as_deref().map(str::trim) {
            None | Some("") => Ok(1),
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                AppError::Validation(format!("quantity must be a whole number, got {raw:?}"))
            }),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetCartItemRequest {
    pub quantity: i64,
}
