// Common DTOs for public API
//
// These types are shared across multiple API endpoints.

use axum::http::StatusCode;
use axum::Json;
use newsletter_engine::EngineError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always false for errors.
    pub ok: bool,
    /// Error message describing what went wrong.
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map an engine error onto an HTTP status and body
///
/// Store details are logged, never returned.
pub fn engine_error(e: EngineError) -> ApiError {
    match e {
        EngineError::InvalidRequest(message) => {
            ErrorResponse::new(message).into_response(StatusCode::BAD_REQUEST)
        }
        EngineError::InvalidTokenState => ErrorResponse::new("Invalid or already used token")
            .into_response(StatusCode::CONFLICT),
        EngineError::ExecutionNotFound(_) => {
            ErrorResponse::new("Execution not found").into_response(StatusCode::NOT_FOUND)
        }
        EngineError::InvalidState { .. } => {
            ErrorResponse::new(e.to_string()).into_response(StatusCode::CONFLICT)
        }
        EngineError::Internal(detail) => {
            tracing::error!("Engine error: {}", detail);
            ErrorResponse::new("Internal server error")
                .into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
        EngineError::StoreUnavailable(source) => {
            tracing::error!("Store unavailable: {}", source);
            ErrorResponse::new("Service temporarily unavailable, try again later")
                .into_response(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
