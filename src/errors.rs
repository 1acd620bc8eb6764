use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::PaymentStatus;

fn current_request_id() -> Option<String> {
    crate::observability::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standardized error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Payment with ID 550e8400-e29b-41d4-a716-446655440000 not found",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Payment with ID 550e8400-e29b-41d4-a716-446655440000 not found")]
    pub message: String,
    /// Additional error details (validation errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The legal-transition table rejected an event. Always a defect or an
    /// out-of-order delivery, never swallowed.
    #[error("Invalid transition: {event} is not allowed from {from}")]
    InvalidTransition {
        from: PaymentStatus,
        event: String,
    },

    #[error("Refund of {requested} exceeds the {available} still available")]
    RefundAmountExceedsAvailable {
        requested: Decimal,
        available: Decimal,
    },

    /// Transient provider failure (network, 5xx). Safe to retry; no ledger
    /// state was written.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Ambiguous provider outcome. Resolved by reconciliation, never by a
    /// blind retry.
    #[error("Provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("Provider rejected the request ({code}): {message}")]
    ProviderRejected { code: String, message: String },

    /// Callback signature did not verify; rejected before any ledger access.
    #[error("Callback signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Malformed callback payload: {0}")]
    MalformedCallback(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

/// Domain alias used by the payment services.
pub type PaymentError = ServiceError;

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<sea_orm::TransactionError<ServiceError>> for ServiceError {
    fn from(err: sea_orm::TransactionError<ServiceError>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(e) => ServiceError::DatabaseError(e),
            sea_orm::TransactionError::Transaction(e) => e,
        }
    }
}

impl ServiceError {
    pub fn invalid_transition(from: PaymentStatus, event: &crate::models::PaymentEvent) -> Self {
        ServiceError::InvalidTransition {
            from,
            event: event.name().to_string(),
        }
    }

    /// True when the underlying database error is a unique-index violation.
    /// Duplicate-intent and replay races are detected through this.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            ServiceError::DatabaseError(db_err)
                if matches!(db_err.sql_err(), Some(sea_orm::SqlErr::UniqueConstraintViolation(_)))
        )
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) | Self::MalformedCallback(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidTransition { .. }
            | Self::Conflict(_)
            | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::RefundAmountExceedsAvailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::ProviderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ProviderRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for payment {}", id)
            }
            // Provider payloads are never echoed raw; the stored failure
            // reason carries the human-readable form
            Self::ProviderUnavailable(_) => "Payment provider is unavailable".to_string(),
            Self::ProviderTimeout(_) => {
                "Payment provider timed out; the outcome will be reconciled".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = self.response_message();

        let request_id = current_request_id();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: error_message,
            details: None,
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentEvent;
    use axum::{body::to_bytes, http::StatusCode};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response = crate::observability::scope_request_id(
            crate::observability::RequestId::new("req-123"),
            async { ServiceError::NotFound("missing".into()).into_response() },
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::invalid_transition(
                PaymentStatus::Failed,
                &PaymentEvent::Confirm {
                    provider_transaction_id: Some("T1".into()),
                    amount: None,
                },
            )
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::RefundAmountExceedsAvailable {
                requested: dec!(80),
                available: dec!(50),
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::ProviderUnavailable("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::ProviderTimeout("slow".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ServiceError::ProviderRejected {
                code: "card_declined".into(),
                message: "declined".into(),
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::SignatureInvalid("bad hmac".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ServiceError::DatabaseError(sea_orm::error::DbErr::Custom(
            "connection string with password".into(),
        ));
        assert_eq!(err.response_message(), "Database error");

        let err = ServiceError::ProviderUnavailable("raw gateway body".into());
        assert!(!err.response_message().contains("raw gateway body"));
    }
}
