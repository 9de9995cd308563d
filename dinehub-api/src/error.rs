/// Error handling for the API server
///
/// All handlers return `Result<T, ApiError>`, which converts to an HTTP
/// response with the body `{ "error": code, "message": text, "details"?: [...] }`.
/// Engine errors map onto status codes as follows:
///
/// | Engine error   | Status | `error`            |
/// |----------------|--------|--------------------|
/// | `Validation`   | 422    | `validation_error` |
/// | `NotFound`     | 404    | `not_found`        |
/// | `Conflict`     | 409    | `conflict`         |
/// | `InvalidState` | 409    | `invalid_state`    |
/// | anything else  | 500    | `internal_error`   |
///
/// # Example
///
/// ```
/// use dinehub_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler() -> ApiResult<Json<serde_json::Value>> {
///     Err(ApiError::BadRequest("missing business_id".to_string()))
/// }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dinehub_shared::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::ValidationErrors;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409): a second active record
    Conflict(String),

    /// Conflict (409): transition not allowed from the current state
    InvalidState(String),

    /// Unprocessable entity (422): request body failed field validation
    ValidationError(Vec<ValidationErrorDetail>),

    /// Unprocessable entity (422): rejected by a business rule
    Unprocessable(String),

    /// Internal server error (500)
    InternalError(String),
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "not_found", "invalid_state")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::Unprocessable(msg) => write!(f, "Validation failed: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::InvalidState(msg) => (StatusCode::CONFLICT, "invalid_state", msg, None),
            ApiError::ValidationError(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg,
                None,
            ),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::Unprocessable(msg),
            EngineError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            EngineError::Conflict(msg) => ApiError::Conflict(msg),
            EngineError::InvalidState { .. } => ApiError::InvalidState(err.to_string()),
            EngineError::Credential(_) | EngineError::Database(_) => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let details = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.code.to_string()),
                })
            })
            .collect();

        ApiError::ValidationError(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: ApiError) -> (StatusCode, ErrorResponse) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("plan not found: 7".to_string());
        assert_eq!(err.to_string(), "Not found: plan not found: 7");
    }

    #[tokio::test]
    async fn test_engine_error_mapping() {
        let (status, body) = render(EngineError::validation("price must not be negative").into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error, "validation_error");
        assert_eq!(body.message, "price must not be negative");

        let (status, body) = render(EngineError::not_found("subscription", "42").into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "not_found");

        let (status, body) = render(EngineError::Conflict("busy".to_string()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error, "conflict");

        let (status, body) = render(
            EngineError::invalid_state("subscription", "expired", "renew instead").into(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error, "invalid_state");
        assert!(body.message.contains("'expired'"));
    }

    #[tokio::test]
    async fn test_database_error_hidden() {
        let (status, body) = render(EngineError::Database(sqlx::Error::PoolTimedOut).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "An internal error occurred");
    }

    #[test]
    fn test_validation_error() {
        let errors = vec![
            ValidationErrorDetail {
                field: "name".to_string(),
                message: "Name must be 1-100 characters".to_string(),
            },
            ValidationErrorDetail {
                field: "price".to_string(),
                message: "Price is required".to_string(),
            },
        ];

        let err = ApiError::ValidationError(errors);
        assert_eq!(err.to_string(), "Validation failed: 2 errors");
    }
}
