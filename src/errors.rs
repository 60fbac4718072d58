use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::middleware_helpers::request_id::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standard error payload returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "coupon not found or invalid",
    "details": null,
    "request_id": "0b355cf6-5731-4a38-9788-7982ec3f0c11",
    "timestamp": "2025-06-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request", "Conflict")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "coupon not found or invalid")]
    pub message: String,
    /// Additional error details (e.g. per-field validation failures)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "quantity: must be at least 1")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "0b355cf6-5731-4a38-9788-7982ec3f0c11")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2025-06-09T10:30:00.000Z")]
    pub timestamp: String,
}

/// Unified error type for every service and handler in the crate.
///
/// Services return `ServiceError` directly; handlers bubble it up with `?`
/// and the `IntoResponse` impl turns it into a JSON error envelope with the
/// right status code.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("{0}")]
    ConflictError(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Event publishing error: {0}")]
    EventError(String),

    #[error("Password hashing error: {0}")]
    HashError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Single source of truth for the HTTP status of each variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ValidationError(_)
            | ServiceError::InvalidInput(_)
            | ServiceError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            ServiceError::ConflictError(_) => StatusCode::CONFLICT,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Unauthorized(_) | ServiceError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ServiceError::EventError(_)
            | ServiceError::HashError(_)
            | ServiceError::InternalError(_)
            | ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to clients. Internal failures are collapsed to a
    /// generic phrase so database and infrastructure details never leak.
    pub fn response_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_)
            | ServiceError::EventError(_)
            | ServiceError::HashError(_)
            | ServiceError::InternalError(_)
            | ServiceError::Other(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string());
                    format!("{}: {}", field, message)
                })
            })
            .collect();
        ServiceError::ValidationError(details.join(", "))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware_helpers::request_id::{scope_request_id, RequestId};

    #[test]
    fn status_code_mapping_is_stable() {
        assert_eq!(
            ServiceError::NotFound("Coupon".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("quantity: must be at least 1".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidStatus("shipped".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ConflictError("usage limit reached".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Forbidden("not your coupon".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::Unauthorized("missing bearer token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        let err = ServiceError::DatabaseError(DbErr::Custom("password=hunter2".into()));
        assert_eq!(err.response_message(), "An internal error occurred");

        let err = ServiceError::NotFound("Coupon".into());
        assert_eq!(err.response_message(), "Coupon not found");
    }

    #[test]
    fn validation_errors_flatten_to_field_messages() {
        use validator::Validate;

        #[derive(Validate)]
        struct Dto {
            #[validate(length(min = 3, message = "too short"))]
            code: String,
        }

        let err: ServiceError = Dto { code: "A".into() }.validate().unwrap_err().into();
        match err {
            ServiceError::ValidationError(msg) => {
                assert!(msg.contains("code"), "missing field name: {msg}");
                assert!(msg.contains("too short"), "missing message: {msg}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_responses_carry_the_scoped_request_id() {
        let response = scope_request_id(RequestId::new("req-err-1"), async {
            ServiceError::NotFound("Order".into()).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["message"], "Order not found");
        assert_eq!(body["request_id"], "req-err-1");
    }
}
