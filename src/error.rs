/// Unified error types for Rental Desk
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the rental service
#[derive(Error, Debug)]
pub enum RentalError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing or invalid credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Caller is known but may not act on the resource
    #[error("Not allowed: {0}")]
    Authorization(String),

    /// Bad or missing input; never reaches the store
    #[error("{0}")]
    Validation(String),

    /// Not found errors (stale ids, unknown voucher tokens)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Date overlaps and illegal status transitions
    #[error("{0}")]
    Conflict(String),

    /// Outbound email failures
    #[error("Email error: {0}")]
    Email(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<validator::ValidationErrors> for RentalError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("Invalid value for {}", field),
                })
            })
            .collect();
        messages.sort();
        RentalError::Validation(messages.join("; "))
    }
}

impl From<JsonRejection> for RentalError {
    fn from(rejection: JsonRejection) -> Self {
        RentalError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for RentalError {
    fn from(rejection: QueryRejection) -> Self {
        RentalError::Validation(rejection.body_text())
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for RentalError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            RentalError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            RentalError::Authorization(_) => {
                tracing::warn!("{}", self);
                (StatusCode::FORBIDDEN, "Forbidden", "Not allowed".to_string())
            }
            RentalError::Validation(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "InvalidRequest",
                self.to_string(),
            ),
            RentalError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            RentalError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            RentalError::Email(_) => {
                tracing::error!("{}", self);
                (
                    StatusCode::BAD_GATEWAY,
                    "EmailUnavailable",
                    "Email delivery failed".to_string(),
                )
            }
            RentalError::Database(_) | RentalError::Internal(_) | RentalError::Io(_) => {
                tracing::error!("{}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(), // Don't leak details
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for rental operations
pub type RentalResult<T> = Result<T, RentalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (RentalError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (RentalError::Authorization("x".into()), StatusCode::FORBIDDEN),
            (RentalError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (RentalError::Conflict("x".into()), StatusCode::CONFLICT),
            (RentalError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_conflict_message_is_not_prefixed() {
        let err = RentalError::Conflict("This car is already booked".into());
        assert_eq!(err.to_string(), "This car is already booked");
    }
}
