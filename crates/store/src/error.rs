use thiserror::Error;

use crate::OrderId;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be acquired within the configured timeout.
    #[error("Lock wait timed out on {resource}")]
    LockTimeout { resource: String },

    /// Applying a delta would drive a tracked stock entry below zero.
    #[error("Stock '{stock_name}' would go negative: available {available}, delta {delta}")]
    NegativeStock {
        stock_name: String,
        available: i64,
        delta: i64,
    },

    /// Applying a delta would push a tracked stock entry past `i64::MAX`.
    #[error("Stock '{stock_name}' would overflow: delta {delta}")]
    StockOverflow { stock_name: String, delta: i64 },

    /// A stock delta was applied without first locking the row in this transaction.
    #[error("Stock row '{stock_name}' was not locked in this transaction")]
    LockNotHeld { stock_name: String },

    /// The order does not exist within the given restaurant.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The audit ledger refused the write.
    #[error("Audit write rejected: {0}")]
    AuditRejected(String),

    /// A stored row could not be mapped back to the model.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
