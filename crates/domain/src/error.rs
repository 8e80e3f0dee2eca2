//! Error kinds returned by order mutations.

use common::{ItemId, OrderId};
use store::{OrderStatus, StoreError};
use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors that can occur while placing, updating or cancelling an order.
///
/// Every variant leaves the ledger, the order and the audit log exactly as
/// they were before the call.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A required field is missing or malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Requested items are unknown or unavailable.
    #[error("Invalid items: {item_ids:?}")]
    InvalidItems { item_ids: Vec<ItemId> },

    /// Consuming the requested quantity would drive a tracked stock below zero.
    #[error("Insufficient stock for '{item}': available {available}, required {required}")]
    InsufficientStock {
        item: String,
        available: i64,
        required: i64,
    },

    /// The order does not exist in the caller's restaurant.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order's status no longer allows edits or cancellation.
    #[error("Invalid state: order {order_id} is {status}")]
    InvalidState {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// A row lock could not be acquired in time.
    #[error("Busy: timed out waiting for {resource}")]
    Busy { resource: String },

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),

    /// The menu catalog failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl OrderError {
    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "validation_error",
            OrderError::InvalidItems { .. } => "invalid_items",
            OrderError::InsufficientStock { .. } => "insufficient_stock",
            OrderError::NotFound(_) => "not_found",
            OrderError::InvalidState { .. } => "invalid_state",
            OrderError::Busy { .. } => "busy",
            OrderError::Storage(_) | OrderError::Catalog(_) => "internal",
        }
    }

    /// Returns true if resubmitting the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::InsufficientStock { .. } | OrderError::Busy { .. }
        )
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout { resource } => OrderError::Busy { resource },
            StoreError::NegativeStock {
                stock_name,
                available,
                delta,
            } => OrderError::InsufficientStock {
                item: stock_name,
                available,
                required: -delta,
            },
            StoreError::StockOverflow { stock_name, delta } => OrderError::Validation(
                stock_overflow_message(&stock_name, delta),
            ),
            StoreError::OrderNotFound(order_id) => OrderError::NotFound(order_id),
            other => OrderError::Storage(other),
        }
    }
}

pub(crate) fn stock_overflow_message(stock_name: &str, delta: i64) -> String {
    format!("stock '{stock_name}' cannot take {delta} more without exceeding its maximum quantity")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_becomes_busy() {
        let err: OrderError = StoreError::LockTimeout {
            resource: "stock 'Coke'".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "busy");
        assert!(err.is_retryable());
    }

    #[test]
    fn negative_stock_keeps_structured_fields() {
        let err: OrderError = StoreError::NegativeStock {
            stock_name: "Coke".to_string(),
            available: 1,
            delta: -2,
        }
        .into();
        match err {
            OrderError::InsufficientStock {
                item,
                available,
                required,
            } => {
                assert_eq!(item, "Coke");
                assert_eq!(available, 1);
                assert_eq!(required, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stock_overflow_is_a_validation_error() {
        let err: OrderError = StoreError::StockOverflow {
            stock_name: "Coke".to_string(),
            delta: 3,
        }
        .into();
        assert_eq!(err.kind(), "validation_error");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Coke"));
    }

    #[test]
    fn request_errors_are_not_retryable() {
        let order_id = OrderId::new();
        assert!(!OrderError::NotFound(order_id).is_retryable());
        assert!(
            !OrderError::InvalidState {
                order_id,
                status: OrderStatus::Served
            }
            .is_retryable()
        );
        assert!(
            !OrderError::InvalidItems {
                item_ids: vec![ItemId::new(9)]
            }
            .is_retryable()
        );
        assert!(!OrderError::Validation("x".to_string()).is_retryable());
    }

    #[test]
    fn storage_failures_are_internal() {
        let err: OrderError = StoreError::AuditRejected("down".to_string()).into();
        assert_eq!(err.kind(), "internal");
        assert!(!err.is_retryable());
    }
}
