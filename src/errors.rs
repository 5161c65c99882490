use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::payments::PaymentGatewayError;
use crate::services::shipping::ShippingError;

/// Hint sent with retryable failures.
const RETRY_AFTER_SECS: &str = "1";

fn current_request_id() -> Option<String> {
    crate::telemetry::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint.
///
/// `code` is the stable failure category clients should branch on; `message`
/// is advisory text for humans.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "code": "payment_not_complete",
    "message": "Payment not complete: payment intent status is requires_payment_method",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Bad Request", "Forbidden")
    pub error: String,
    /// Machine-readable error category
    pub code: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Account verification required before checkout")]
    Unverified,

    #[error("Invalid shipping info: {message}")]
    InvalidShipping { field: String, message: String },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cart is empty or was already converted to an order")]
    CartEmpty,

    #[error("Payment not complete: payment intent status is {0}")]
    PaymentNotComplete(String),

    #[error("Shipping info is missing from the request and the payment intent")]
    MissingShipping,

    #[error("Invalid webhook signature")]
    SignatureInvalid,

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    #[error("Payment provider timed out: {0}")]
    PaymentProviderTimeout(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<ShippingError> for ServiceError {
    fn from(err: ShippingError) -> Self {
        ServiceError::InvalidShipping {
            field: err.field().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<PaymentGatewayError> for ServiceError {
    fn from(err: PaymentGatewayError) -> Self {
        match err {
            PaymentGatewayError::Timeout => ServiceError::PaymentProviderTimeout(err.to_string()),
            PaymentGatewayError::NotFound(id) => {
                ServiceError::NotFound(format!("Payment intent {}", id))
            }
            other => ServiceError::PaymentProvider(other.to_string()),
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidShipping { .. }
            | Self::EmptyCart
            | Self::CartEmpty
            | Self::PaymentNotComplete(_)
            | Self::MissingShipping
            | Self::SignatureInvalid
            | Self::BadRequest(_)
            | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Unverified | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TransactionConflict(_) => StatusCode::CONFLICT,
            Self::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            Self::PaymentProviderTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable category string. Callers should match on this, not on `message`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::InvalidShipping { .. } => "invalid_shipping",
            Self::EmptyCart => "empty_cart",
            Self::CartEmpty => "cart_empty",
            Self::PaymentNotComplete(_) => "payment_not_complete",
            Self::MissingShipping => "missing_shipping",
            Self::SignatureInvalid => "signature_invalid",
            Self::TransactionConflict(_) => "transaction_conflict",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::ValidationError(_) => "validation_error",
            Self::PaymentProvider(_) => "payment_provider_error",
            Self::PaymentProviderTimeout(_) => "payment_provider_timeout",
            Self::DatabaseError(_) => "database_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PaymentProviderTimeout(_) | Self::TransactionConflict(_)
        )
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::PaymentProvider(_) => "Payment provider unavailable".to_string(),
            Self::PaymentProviderTimeout(_) => {
                "Payment provider timed out, please retry".to_string()
            }
            Self::TransactionConflict(_) => {
                "Order is being processed by another request, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let mut response = (status, Json(err)).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id_and_code() {
        let response = crate::telemetry::scope_request_id(
            crate::telemetry::RequestId::new("req-123"),
            async { ServiceError::PaymentNotComplete("processing".into()).into_response() },
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "payment_not_complete");
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(ServiceError::Unverified.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServiceError::InvalidShipping {
                field: "city".into(),
                message: "city is required".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::EmptyCart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::CartEmpty.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::SignatureInvalid.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::TransactionConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PaymentProvider("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::PaymentProviderTimeout("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("connection refused on 10.0.0.4".into())
                .response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::PaymentProvider("401 invalid api key sk_live_...".into())
                .response_message(),
            "Payment provider unavailable"
        );
        assert_eq!(
            ServiceError::NotFound("Order 42".into()).response_message(),
            "Not found: Order 42"
        );
    }

    #[test]
    fn shipping_errors_name_the_field() {
        let err: ServiceError = ShippingError::Missing("city").into();
        match err {
            ServiceError::InvalidShipping { field, message } => {
                assert_eq!(field, "city");
                assert!(message.contains("city"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn conflicts_hide_driver_text_and_ask_for_retry() {
        let err = ServiceError::TransactionConflict("database is locked".into());
        assert!(!err.response_message().contains("locked"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "transaction_conflict");
        assert!(!payload.message.contains("database"));
    }

    #[test]
    fn non_retryable_errors_carry_no_retry_hint() {
        let response = ServiceError::CartEmpty.into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn gateway_timeout_is_retryable() {
        let err: ServiceError = PaymentGatewayError::Timeout.into();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "payment_provider_timeout");
    }
}
