//! HTTP error envelope.
//!
//! Every engine failure surfaces as `{code, message, data?}` with the status
//! line fixed by the code: 401/403/404/409/429, and 500 for anything the
//! contract does not name. Rate-limit refusals also carry a `Retry-After`
//! header.

use ar_core::CoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Wrapper so engine errors can be returned straight from handlers.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match &self.0 {
            CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let CoreError::RateLimited { retry_at } = self.0 {
            let retry_after_secs =
                ((retry_at - ar_core::now_ms()).max(0) as u64 / 1000).max(1);
            return (
                status,
                [("Retry-After", retry_after_secs.to_string())],
                Json(json!({
                    "code": code,
                    "message": self.0.to_string(),
                    "data": {"retry_at": retry_at}
                })),
            )
                .into_response();
        }

        // Internal details stay in the logs, not on the wire.
        let message = match &self.0 {
            CoreError::Internal(detail) => {
                tracing::error!(detail, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({"code": code, "message": message}))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
