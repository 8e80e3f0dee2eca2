//! API error types with HTTP response mapping.
//!
//! Every error is rendered as `{"error", "kind", "retryable", ...}` so that
//! clients can branch on `kind` and read structured fields instead of parsing
//! the message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;
use serde_json::{Value, json};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Identity headers missing or malformed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed path or body value.
    #[error("{0}")]
    BadRequest(String),

    /// Resource other than an order not found.
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                envelope(&format!("Unauthorized: {msg}"), "unauthorized", false),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                envelope(&msg, "validation_error", false),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, envelope(&msg, "not_found", false)),
            ApiError::Order(err) => order_error_to_response(err),
        };
        if let Some(kind) = body["kind"].as_str() {
            metrics::counter!("api_errors_total", "kind" => kind.to_string()).increment(1);
        }

        (status, Json(body)).into_response()
    }
}

fn envelope(message: &str, kind: &str, retryable: bool) -> Value {
    json!({
        "error": message,
        "kind": kind,
        "retryable": retryable,
    })
}

fn order_error_to_response(err: OrderError) -> (StatusCode, Value) {
    let status = match &err {
        OrderError::Validation(_) => StatusCode::BAD_REQUEST,
        OrderError::InvalidItems { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OrderError::InsufficientStock { .. } | OrderError::InvalidState { .. } => {
            StatusCode::CONFLICT
        }
        OrderError::NotFound(_) => StatusCode::NOT_FOUND,
        OrderError::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OrderError::Storage(_) | OrderError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "internal server error");
        return (
            status,
            envelope("Internal server error", err.kind(), err.is_retryable()),
        );
    }

    let mut body = envelope(&err.to_string(), err.kind(), err.is_retryable());
    match &err {
        OrderError::InsufficientStock {
            item,
            available,
            required,
        } => {
            body["item"] = json!(item);
            body["available"] = json!(available);
            body["required"] = json!(required);
        }
        OrderError::InvalidItems { item_ids } => {
            body["item_ids"] = json!(item_ids);
        }
        OrderError::InvalidState { order_id, status } => {
            body["order_id"] = json!(order_id);
            body["status"] = json!(status);
        }
        OrderError::NotFound(order_id) => {
            body["order_id"] = json!(order_id);
        }
        _ => {}
    }
    (status, body)
}
