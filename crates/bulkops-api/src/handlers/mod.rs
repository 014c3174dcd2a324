pub mod health;
pub mod jobs;

use axum::{Json, http::StatusCode, response::IntoResponse};
use bulkops_common::error::BulkopsError;
use tracing::error;

pub struct ApiError(pub BulkopsError);

impl From<BulkopsError> for ApiError {
    fn from(value: BulkopsError) -> Self {
        Self(value)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            BulkopsError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            BulkopsError::AccessDenied(_) => StatusCode::FORBIDDEN,
            BulkopsError::JobNotFound(_) => StatusCode::NOT_FOUND,
            BulkopsError::JobAlreadyTerminal(_) | BulkopsError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }

        (
            status,
            Json(serde_json::json!({
                "code": self.0.error_code(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}
