//! Mapping from core error tags to HTTP responses. This is the only place
//! that knows both vocabularies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Auth(msg) if msg.contains("token") => StatusCode::UNAUTHORIZED,
            CoreError::Auth(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": err.to_string(),
            "kind": err.kind(),
        });
        (status, axum::Json(body)).into_response()
    }
}
