//! Order mutation commands.

use common::{ItemId, OrderId};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// A line as requested by the caller, before pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedLine {
    pub item_id: ItemId,
    pub quantity: u32,
    #[serde(default)]
    pub notes: String,
}

impl RequestedLine {
    pub fn new(item_id: i64, quantity: u32) -> Self {
        Self {
            item_id: ItemId::new(item_id),
            quantity,
            notes: String::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// Command to place a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub table_identifier: String,
    pub lines: Vec<RequestedLine>,
}

impl PlaceOrder {
    pub fn new(table_identifier: impl Into<String>, lines: Vec<RequestedLine>) -> Self {
        Self {
            table_identifier: table_identifier.into(),
            lines,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), OrderError> {
        validate_table(&self.table_identifier)?;
        validate_lines(&self.lines)
    }
}

/// Command to replace the lines (and table) of an existing order.
#[derive(Debug, Clone)]
pub struct UpdateOrder {
    pub order_id: OrderId,
    pub table_identifier: String,
    pub lines: Vec<RequestedLine>,
}

impl UpdateOrder {
    pub fn new(
        order_id: OrderId,
        table_identifier: impl Into<String>,
        lines: Vec<RequestedLine>,
    ) -> Self {
        Self {
            order_id,
            table_identifier: table_identifier.into(),
            lines,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), OrderError> {
        validate_table(&self.table_identifier)?;
        validate_lines(&self.lines)
    }
}

/// Command to cancel an order and restore its stock.
#[derive(Debug, Clone, Copy)]
pub struct CancelOrder {
    pub order_id: OrderId,
}

impl CancelOrder {
    pub fn new(order_id: OrderId) -> Self {
        Self { order_id }
    }
}

fn validate_table(table_identifier: &str) -> Result<(), OrderError> {
    if table_identifier.trim().is_empty() {
        return Err(OrderError::Validation(
            "table identifier is required".to_string(),
        ));
    }
    Ok(())
}

fn validate_lines(lines: &[RequestedLine]) -> Result<(), OrderError> {
    if lines.is_empty() {
        return Err(OrderError::Validation(
            "at least one item is required".to_string(),
        ));
    }
    if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
        return Err(OrderError::Validation(format!(
            "quantity for item {} must be at least 1",
            line.item_id
        )));
    }
    Ok(())
}
