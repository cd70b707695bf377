use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::errors::OrchestraError;

impl IntoResponse for OrchestraError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            OrchestraError::Validation(_) | OrchestraError::Config(_) | OrchestraError::Json(_) => StatusCode::BAD_REQUEST,
            OrchestraError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestraError::AgentUnavailable(_) | OrchestraError::CircuitBreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestraError::TaskTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OrchestraError::Cancelled(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let class = self.classify();

        (status, Json(json!({"error": self.to_string(), "error_type": class.error_type}))).into_response()
    }
}
