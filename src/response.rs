use serde::Serialize;
use utoipa::ToSchema;

/// Paging details for list responses; all fields are `null` on single-item bodies.
#[derive(Debug, Default, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct Meta {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub total: Option<i64>,
}

impl Meta {
    pub fn paged(page: i64, per_page: i64, total: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
            total: Some(total),
        }
    }

    /// Unpaginated collection of `total` elements.
    pub fn counted(total: usize) -> Self {
        Self {
            total: Some(i64::try_from(total).unwrap_or(i64::MAX)),
            ..Self::default()
        }
    }
}

/// Envelope shared by every JSON body the service returns, errors included.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: Option<T>,
    pub meta: Option<Meta>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T, meta: Meta) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            meta: Some(meta),
        }
    }

    /// Single-item body with blank paging details.
    pub fn plain(message: impl Into<String>, data: T) -> Self {
        Self::success(message, data, Meta::default())
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}
