//! Maps `CoreError` onto the `{ok, error, detail}` JSON envelope every
//! handler returns, per spec.md §7's error-propagation policy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use concord_core::CoreError;
use serde_json::json;
use tracing::error;

pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        if err.is_fatal() {
            error!(error = %err, "fatal error propagated to api boundary");
        }

        let status = match &err {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::CannotBuyOwnListing => StatusCode::BAD_REQUEST,
            CoreError::EmergentCannotWithdrawToFiat => StatusCode::FORBIDDEN,
            CoreError::CitationCycleDetected => StatusCode::CONFLICT,
            CoreError::CitationSelfEdge => StatusCode::BAD_REQUEST,
            CoreError::Idempotent(_) => StatusCode::OK,
            CoreError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::ExternalFailure(_) => StatusCode::BAD_GATEWAY,
            CoreError::StorageFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({
            "ok": false,
            "error": err.tag(),
            "detail": err.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
