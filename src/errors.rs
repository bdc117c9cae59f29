use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ResponseMeta;

/// Error envelope shared by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "error": {
        "code": "INSUFFICIENT_STOCK",
        "message": "Insufficient stock for item 0 (product 550e8400-e29b-41d4-a716-446655440000): requested 12, available 10",
        "details": {"index": 0, "productId": "550e8400-e29b-41d4-a716-446655440000", "requested": 12, "available": 10}
    },
    "meta": {"requestId": "req-abc123xyz", "timestamp": "2026-03-09T10:30:00.000Z"}
}))]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code, e.g. `ORDER_NOT_FOUND`
    #[schema(example = "ORDER_NOT_FOUND")]
    pub code: String,
    /// Human-readable description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<Value>,
}

/// A single failing request field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// What the payment provider told us when a create or capture did not succeed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    #[serde(skip)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_id: Option<String>,
}

impl ProviderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        if let Some(code) = &self.provider_code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
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

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Validation failed for {} field(s)", .0.len())]
    InvalidFields(Vec<FieldError>),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Insufficient stock for item {index} (product {product_id}): {reason}")]
    InsufficientStock {
        index: usize,
        product_id: Uuid,
        reason: String,
        requested: i32,
        available: Option<i32>,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Payment provider error: {0}")]
    PaymentProviderError(ProviderFailure),

    #[error("Could not allocate a unique order number after {0} attempts")]
    OrderNumberExhausted(u32),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidFields(field_errors(&err))
    }
}

/// Flattens validator output into `field: message` pairs, nested structs as `parent.child`
/// and list entries as `parent[i].child`.
pub fn field_errors(errors: &validator::ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect_field_errors("", errors, &mut out);
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}

fn collect_field_errors(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<FieldError>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for e in errs {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' check", e.code));
                    out.push(FieldError {
                        field: path.clone(),
                        message,
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_field_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    collect_field_errors(&format!("{}[{}]", path, idx), inner, out);
                }
            }
        }
    }
}

impl ServiceError {
    pub fn order_not_found(reference: impl std::fmt::Display) -> Self {
        ServiceError::OrderNotFound(reference.to_string())
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidFields(_)
            | Self::InvalidTransition(_)
            | Self::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::PaymentProviderError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::OrderNumberExhausted(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code carried in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::ValidationError(_) | Self::InvalidFields(_) => "VALIDATION_ERROR",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RateLimitExceeded => "RATE_LIMITED",
            Self::PaymentProviderError(_) => "PAYMENT_PROVIDER_ERROR",
            Self::OrderNumberExhausted(_) => "ORDER_NUMBER_EXHAUSTED",
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::InvalidFields(_) => "Request validation failed".to_string(),
            Self::RateLimitExceeded => "Too many requests, please retry later".to_string(),
            _ => self.to_string(),
        }
    }

    /// Structured details, when the error has any.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidFields(fields) => Some(json!({ "fields": fields })),
            Self::InsufficientStock {
                index,
                product_id,
                requested,
                available,
                ..
            } => Some(json!({
                "index": index,
                "productId": product_id,
                "requested": requested,
                "available": available,
            })),
            Self::PaymentProviderError(failure) => serde_json::to_value(failure)
                .ok()
                .filter(|v| v.as_object().map(|o| !o.is_empty()).unwrap_or(false)),
            _ => None,
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code().is_server_error() && !matches!(self, Self::OrderNumberExhausted(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_internal() {
            tracing::error!(error = %self, code = self.code(), "request failed with internal error");
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.response_message(),
                details: self.details(),
            },
            meta: ResponseMeta::capture(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use validator::Validate;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::order_not_found("PF-260101-ABCDEF").into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(!payload.success);
        assert_eq!(payload.error.code, "ORDER_NOT_FOUND");
        assert_eq!(payload.meta.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn status_and_code_mapping() {
        let cases = vec![
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                ServiceError::ValidationError("x".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                ServiceError::InvalidTransition("x".into()),
                StatusCode::BAD_REQUEST,
                "INVALID_TRANSITION",
            ),
            (
                ServiceError::Unauthorized("x".into()),
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
            ),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (
                ServiceError::RateLimitExceeded,
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
            ),
            (
                ServiceError::PaymentProviderError(ProviderFailure::new("boom")),
                StatusCode::BAD_GATEWAY,
                "PAYMENT_PROVIDER_ERROR",
            ),
            (
                ServiceError::OrderNumberExhausted(5),
                StatusCode::INTERNAL_SERVER_ERROR,
                "ORDER_NUMBER_EXHAUSTED",
            ),
            (
                ServiceError::InternalError("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status, "{:?}", err);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn internal_messages_are_hidden() {
        let err = ServiceError::DatabaseError(sea_orm::DbErr::Custom("secret dsn".into()));
        assert_eq!(err.response_message(), "Internal server error");
        assert_eq!(err.code(), "INTERNAL_ERROR");

        assert_eq!(
            ServiceError::InternalError("stack".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("Product 1".into()).response_message(),
            "Not found: Product 1"
        );
    }

    #[test]
    fn insufficient_stock_names_the_item() {
        let product_id = Uuid::new_v4();
        let err = ServiceError::InsufficientStock {
            index: 1,
            product_id,
            reason: "requested 3, available 2".into(),
            requested: 3,
            available: Some(2),
        };
        assert!(err.to_string().contains(&product_id.to_string()));
        let details = err.details().unwrap();
        assert_eq!(details["index"], 1);
        assert_eq!(details["available"], 2);
    }

    #[test]
    fn provider_details_skip_missing_fields() {
        let failure = ProviderFailure {
            message: "capture declined".into(),
            provider_status: Some("PAYER_ACTION_REQUIRED".into()),
            provider_code: None,
            debug_id: Some("dbg-1".into()),
        };
        let details = ServiceError::PaymentProviderError(failure).details().unwrap();
        assert_eq!(details["providerStatus"], "PAYER_ACTION_REQUIRED");
        assert_eq!(details["debugId"], "dbg-1");
        assert!(details.get("providerCode").is_none());

        assert!(ServiceError::PaymentProviderError(ProviderFailure::new("timeout"))
            .details()
            .is_none());
    }

    #[derive(Debug, Validate)]
    struct Signup {
        #[validate(email)]
        email: String,
        #[validate(length(min = 1, message = "name is required"))]
        name: String,
    }

    #[test]
    fn validation_errors_become_field_list() {
        let signup = Signup {
            email: "not-an-email".into(),
            name: String::new(),
        };
        let err: ServiceError = signup.validate().unwrap_err().into();
        match &err {
            ServiceError::InvalidFields(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].field, "email");
                assert_eq!(fields[1].field, "name");
                assert_eq!(fields[1].message, "name is required");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
