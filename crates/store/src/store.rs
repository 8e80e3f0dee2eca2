use async_trait::async_trait;

use crate::{
    AuditQuery, AuditRecord, Money, Order, OrderId, OrderLine, OrderStatus, RestaurantId, Result,
    StockEntry,
};

/// Per-(restaurant, stock name) quantity counters.
///
/// Rows must be locked with [`StockLedger::lock_and_read`] before a delta is
/// applied to them in the same transaction.
#[async_trait]
pub trait StockLedger: Send {
    /// Locks the stock row for the rest of the transaction and returns its
    /// quantity, or `None` if the name is untracked.
    ///
    /// Blocks while another transaction holds the same row. Fails with
    /// `LockTimeout` once the configured wait is exceeded.
    async fn lock_and_read(
        &mut self,
        restaurant_id: RestaurantId,
        stock_name: &str,
    ) -> Result<Option<i64>>;

    /// Adds `delta` to a locked row. Untracked names are left alone.
    ///
    /// Fails with `NegativeStock` if the result would drop below zero.
    async fn apply_delta(
        &mut self,
        restaurant_id: RestaurantId,
        stock_name: &str,
        delta: i64,
    ) -> Result<()>;
}

/// Restaurant-scoped order rows.
#[async_trait]
pub trait OrderStore: Send {
    /// Loads and row-locks an order. Orders of other restaurants are invisible.
    async fn get_for_update(
        &mut self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<Order>>;

    async fn create(&mut self, order: &Order) -> Result<OrderId>;

    /// Overwrites table, lines and total of an existing order.
    async fn replace_lines(
        &mut self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
        table_identifier: &str,
        lines: &[OrderLine],
        total: Money,
    ) -> Result<()>;

    async fn delete(&mut self, order_id: OrderId, restaurant_id: RestaurantId) -> Result<()>;
}

/// Append-only history of order states.
#[async_trait]
pub trait AuditLedger: Send {
    async fn record(&mut self, record: &AuditRecord) -> Result<()>;
}

/// One atomic unit of work spanning the stock ledger, the order store and the
/// audit ledger.
///
/// Dropping a transaction without committing discards every write and
/// releases every lock.
#[async_trait]
pub trait Transaction: StockLedger + OrderStore + AuditLedger {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Entry point to a storage backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Begins a transaction with the backend's lock-wait timeout applied.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    async fn get_order(
        &self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<Order>>;

    /// Lists a restaurant's orders, newest first.
    async fn list_orders(&self, restaurant_id: RestaurantId) -> Result<Vec<Order>>;

    /// Moves an order to another status. Returns `None` if it does not exist.
    async fn set_status(
        &self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
        status: OrderStatus,
    ) -> Result<Option<Order>>;

    async fn stock_level(
        &self,
        restaurant_id: RestaurantId,
        stock_name: &str,
    ) -> Result<Option<StockEntry>>;

    /// Creates or overwrites a stock entry, making the name tracked.
    async fn set_stock(
        &self,
        restaurant_id: RestaurantId,
        stock_name: &str,
        quantity: i64,
    ) -> Result<StockEntry>;

    /// Returns audit records ordered by `changed_at`, oldest first.
    async fn list_audit(&self, query: AuditQuery) -> Result<Vec<AuditRecord>>;
}
