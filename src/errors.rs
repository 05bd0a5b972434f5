use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::services::payment_gateway::GatewayError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "error": "Bad Request",
    "kind": "BelowMinimumOrder",
    "message": "Order total 30.00 is below the minimum order amount of 50.00",
    "requestId": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Stable, machine-readable error kind
    #[schema(example = "BelowMinimumOrder")]
    pub kind: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details (validation field errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Menu item not found: {0}")]
    ItemNotFound(String),

    #[error("Order total {total} is below the minimum order amount of {minimum}")]
    BelowMinimumOrder { total: Decimal, minimum: Decimal },

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid transition of {axis} from {from} to {to}")]
    InvalidTransition {
        axis: &'static str,
        from: String,
        to: String,
    },

    #[error("Payment not completed for session {0}")]
    PaymentNotCompleted(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

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
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::GatewayUnavailable(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart
            | Self::BelowMinimumOrder { .. }
            | Self::InvalidTransition { .. }
            | Self::PaymentNotCompleted(_)
            | Self::ValidationError(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ItemNotFound(_) | Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable error kind exposed to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyCart => "EmptyCart",
            Self::ItemNotFound(_) => "ItemNotFound",
            Self::BelowMinimumOrder { .. } => "BelowMinimumOrder",
            Self::GatewayUnavailable(_) => "GatewayUnavailable",
            Self::OrderNotFound(_) => "OrderNotFound",
            Self::AccessDenied(_) => "AccessDenied",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::PaymentNotCompleted(_) => "PaymentNotCompleted",
            Self::ValidationError(_) => "ValidationError",
            Self::Unauthorized(_) => "Unauthorized",
            Self::BadRequest(_) => "BadRequest",
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => "InternalError",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            // Gateway failures can carry upstream bodies; keep only the category
            Self::GatewayUnavailable(_) => {
                "Payment gateway is unavailable, please try again later".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            kind: self.kind().to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
