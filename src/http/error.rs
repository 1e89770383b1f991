use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::engine::EngineError;

/// Engine error carried out through a handler.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    retryable: bool,
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidDuration(_)
        | EngineError::InvalidTime(_)
        | EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        EngineError::InvalidShift(_)
        | EngineError::OutsideShift { .. }
        | EngineError::NotQualified { .. }
        | EngineError::BranchMismatch { .. }
        | EngineError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::StaffBusy { .. } | EngineError::Conflict(_) | EngineError::NoStaffAvailable => {
            StatusCode::CONFLICT
        }
        EngineError::Busy | EngineError::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            // Already logged where it was raised; don't leak internals.
            EngineError::Invariant(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        };
        let body = ErrorResponse {
            code: self.0.code(),
            message,
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
