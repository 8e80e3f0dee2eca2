//! Persistent data model: stock entries, orders, and audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActorId, ItemId, OrderId, RestaurantId};

/// Money amount represented in minor units (cents) to keep totals exact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money(self.0 * i64::from(quantity))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// A tracked stock pool.
///
/// Items with no matching entry are untracked and always orderable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub restaurant_id: RestaurantId,
    pub stock_name: String,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    #[default]
    Preparing,
    Served,
    Archived,
}

impl OrderStatus {
    /// Returns true if lines may still be edited or the order cancelled.
    pub fn is_mutable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Preparing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Served => "served",
            OrderStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "preparing" => Ok(OrderStatus::Preparing),
            "served" => Ok(OrderStatus::Served),
            "archived" => Ok(OrderStatus::Archived),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// A line of an order.
///
/// Name, stock pool, and unit price are captured when the line is written so
/// that restoring stock never depends on the current state of the menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: ItemId,
    pub item_name: String,
    pub stock_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    #[serde(default)]
    pub notes: String,
}

impl OrderLine {
    /// Returns quantity * unit_price.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// The order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub restaurant_id: RestaurantId,
    pub table_identifier: String,
    pub lines: Vec<OrderLine>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub placed_by: ActorId,
}

impl Order {
    /// Captures the parts of the order an edit or cancellation overwrites.
    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            table_identifier: self.table_identifier.clone(),
            lines: self.lines.clone(),
            total_amount: self.total_amount,
            status: self.status,
        }
    }
}

/// Prior state of an order as recorded in the audit ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub table_identifier: String,
    pub lines: Vec<OrderLine>,
    pub total_amount: Money,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Updated,
    Cancelled,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Updated => "updated",
            AuditAction::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updated" => Ok(AuditAction::Updated),
            "cancelled" => Ok(AuditAction::Cancelled),
            other => Err(format!("unknown audit action '{other}'")),
        }
    }
}

/// Append-only record of an order's state immediately before a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub order_id: OrderId,
    pub restaurant_id: RestaurantId,
    pub changed_by: ActorId,
    pub changed_at: DateTime<Utc>,
    pub action: AuditAction,
    pub prior_snapshot: OrderSnapshot,
    pub remark: String,
}

impl AuditRecord {
    /// Builds a record capturing `order` as it is right now.
    pub fn capture(
        order: &Order,
        action: AuditAction,
        changed_by: ActorId,
        remark: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            changed_by,
            changed_at: Utc::now(),
            action,
            prior_snapshot: order.snapshot(),
            remark: remark.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(item: i64, quantity: u32, price: i64) -> OrderLine {
        OrderLine {
            item_id: ItemId::new(item),
            item_name: format!("Item {item}"),
            stock_name: format!("Item {item}"),
            quantity,
            unit_price: Money::from_cents(price),
            notes: String::new(),
        }
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
    }

    #[test]
    fn money_sum_and_multiply() {
        let total: Money = [Money::from_cents(100), Money::from_cents(250)]
            .into_iter()
            .sum();
        assert_eq!(total.cents(), 350);
        assert_eq!(Money::from_cents(150).multiply(3).cents(), 450);
    }

    #[test]
    fn mutable_statuses() {
        assert!(OrderStatus::Pending.is_mutable());
        assert!(OrderStatus::Preparing.is_mutable());
        assert!(!OrderStatus::Served.is_mutable());
        assert!(!OrderStatus::Archived.is_mutable());
    }

    #[test]
    fn status_parses_its_own_name() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Preparing,
            OrderStatus::Served,
            OrderStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert!("closed".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&OrderStatus::Preparing).unwrap();
        assert_eq!(json, "\"preparing\"");
    }

    #[test]
    fn audit_capture_copies_prior_state() {
        let order = Order {
            id: OrderId::new(),
            restaurant_id: RestaurantId::new(),
            table_identifier: "T4".to_string(),
            lines: vec![line(1, 2, 300), line(2, 1, 150)],
            total_amount: Money::from_cents(750),
            status: OrderStatus::Preparing,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            placed_by: ActorId::new(),
        };
        let actor = ActorId::new();

        let record = AuditRecord::capture(&order, AuditAction::Updated, actor, "edited");

        assert_eq!(record.order_id, order.id);
        assert_eq!(record.restaurant_id, order.restaurant_id);
        assert_eq!(record.changed_by, actor);
        assert_eq!(record.prior_snapshot.lines, order.lines);
        assert_eq!(record.prior_snapshot.total_amount.cents(), 750);
        assert_eq!(record.prior_snapshot.table_identifier, "T4");
    }

    #[test]
    fn order_line_notes_default_when_missing() {
        let json = serde_json::json!({
            "item_id": 3,
            "item_name": "Momo",
            "stock_name": "Momo",
            "quantity": 2,
            "unit_price": 250
        });
        let line: OrderLine = serde_json::from_value(json).unwrap();
        assert_eq!(line.notes, "");
        assert_eq!(line.line_total().cents(), 500);
    }
}
