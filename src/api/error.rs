//! HTTP mapping of boundary errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::db::DbError;
use crate::error::{ErrorKind, PrismError};

#[derive(Debug)]
pub struct ApiError(pub PrismError);

impl From<PrismError> for ApiError {
    fn from(err: PrismError) -> Self {
        ApiError(err)
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError(PrismError::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::Cancelled => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("API: {}", self.0);
        }

        let mut error = json!({
            "code": kind.code(),
            "message": match &self.0 {
                PrismError::Validation { message, .. } => message.clone(),
                other => other.to_string(),
            },
        });
        if let PrismError::Validation { fields, .. } = &self.0 {
            error["fields"] = json!(fields);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

pub fn not_found(what: &str, id: &str) -> ApiError {
    ApiError(PrismError::NotFound(format!("{} {}", what, id)))
}

pub fn invalid(field: &str, message: impl Into<String>) -> ApiError {
    ApiError(PrismError::invalid(field, message))
}
