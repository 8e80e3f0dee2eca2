use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::{
    AuditQuery, AuditRecord, Money, Order, OrderId, OrderLine, OrderStatus, RestaurantId, Result,
    StockEntry, StoreError,
    store::{AuditLedger, OrderStore, StockLedger, Store, Transaction},
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type StockKey = (RestaurantId, String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Stock(RestaurantId, String),
    Order(OrderId),
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKey::Stock(restaurant_id, name) => write!(f, "stock '{name}' of {restaurant_id}"),
            RowKey::Order(order_id) => write!(f, "order {order_id}"),
        }
    }
}

/// One async mutex per row, created on first use and removed once no
/// holder or waiter references it.
#[derive(Default)]
struct LockTable {
    rows: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    fn row(&self, key: &RowKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.entry(key.clone()).or_default().clone()
    }

    fn release(&self, key: &RowKey) {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if rows.get(key).is_some_and(|row| Arc::strong_count(row) == 1) {
            rows.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A held row lock. Dropping it unlocks the row.
struct RowGuard {
    key: RowKey,
    locks: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.key);
    }
}

#[derive(Default)]
struct Tables {
    stock: HashMap<StockKey, StockEntry>,
    orders: HashMap<OrderId, Order>,
    audit: Vec<AuditRecord>,
}

/// In-memory store for tests and local runs.
///
/// Row locks are emulated with one async mutex per stock row and per order,
/// held until the owning transaction commits or is dropped. Writes are staged
/// inside the transaction and applied together on commit.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
    fail_audit_writes: Arc<AtomicBool>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            locks: Arc::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            fail_audit_writes: Arc::default(),
        }
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a transaction waits for a row lock before giving up.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Makes every subsequent audit write fail until switched off.
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the total number of audit records stored.
    pub async fn audit_count(&self) -> usize {
        self.tables.read().await.audit.len()
    }

    /// Returns the total number of orders stored, across all restaurants.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    async fn lock_row(&self, key: RowKey) -> Result<RowGuard> {
        let row = self.locks.row(&key);
        let acquired = tokio::time::timeout(self.lock_timeout, row.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(RowGuard {
                key,
                locks: self.locks.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.locks.release(&key);
                Err(StoreError::LockTimeout {
                    resource: key.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            held: HashMap::new(),
            stock_deltas: HashMap::new(),
            order_writes: HashMap::new(),
            audit: Vec::new(),
        }))
    }

    async fn get_order(
        &self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .get(&order_id)
            .filter(|o| o.restaurant_id == restaurant_id)
            .cloned())
    }

    async fn list_orders(&self, restaurant_id: RestaurantId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.restaurant_id == restaurant_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn set_status(
        &self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
        status: OrderStatus,
    ) -> Result<Option<Order>> {
        let _guard = self.lock_row(RowKey::Order(order_id)).await?;
        let mut tables = self.tables.write().await;
        let Some(order) = tables
            .orders
            .get_mut(&order_id)
            .filter(|o| o.restaurant_id == restaurant_id)
        else {
            return Ok(None);
        };
        order.status = status;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn stock_level(
        &self,
        restaurant_id: RestaurantId,
        stock_name: &str,
    ) -> Result<Option<StockEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .stock
            .get(&(restaurant_id, stock_name.to_string()))
            .cloned())
    }

    async fn set_stock(
        &self,
        restaurant_id: RestaurantId,
        stock_name: &str,
        quantity: i64,
    ) -> Result<StockEntry> {
        if quantity < 0 {
            return Err(StoreError::NegativeStock {
                stock_name: stock_name.to_string(),
                available: 0,
                delta: quantity,
            });
        }

        let _guard = self
            .lock_row(RowKey::Stock(restaurant_id, stock_name.to_string()))
            .await?;
        let entry = StockEntry {
            restaurant_id,
            stock_name: stock_name.to_string(),
            quantity,
            updated_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .stock
            .insert((restaurant_id, stock_name.to_string()), entry.clone());
        Ok(entry)
    }

    async fn list_audit(&self, query: AuditQuery) -> Result<Vec<AuditRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .audit
            .iter()
            .filter(|r| {
                if r.restaurant_id != query.restaurant_id {
                    return false;
                }
                if let Some(order_id) = query.order_id
                    && r.order_id != order_id
                {
                    return false;
                }
                if let Some(actor) = query.changed_by
                    && r.changed_by != actor
                {
                    return false;
                }
                if let Some(action) = query.action
                    && r.action != action
                {
                    return false;
                }
                if let Some(from) = query.from_timestamp
                    && r.changed_at < from
                {
                    return false;
                }
                if let Some(to) = query.to_timestamp
                    && r.changed_at > to
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        records.sort_by(|a, b| a.changed_at.cmp(&b.changed_at));

        let offset = query.offset.unwrap_or(0);
        let records = records.into_iter().skip(offset);
        Ok(match query.limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        })
    }
}

/// A unit of work against [`InMemoryStore`].
pub struct InMemoryTransaction {
    store: InMemoryStore,
    held: HashMap<RowKey, RowGuard>,
    stock_deltas: HashMap<StockKey, i64>,
    /// `None` marks a deleted order.
    order_writes: HashMap<OrderId, Option<Order>>,
    audit: Vec<AuditRecord>,
}

impl InMemoryTransaction {
    async fn acquire(&mut self, key: RowKey) -> Result<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let guard = self.store.lock_row(key.clone()).await?;
        self.held.insert(key, guard);
        Ok(())
    }

    /// Committed quantity plus whatever this transaction has staged.
    async fn current_quantity(&self, key: &StockKey) -> Option<i64> {
        let committed = self
            .store
            .tables
            .read()
            .await
            .stock
            .get(key)
            .map(|e| e.quantity)?;
        Some(committed.saturating_add(self.stock_deltas.get(key).copied().unwrap_or(0)))
    }

    async fn current_order(&self, order_id: OrderId) -> Option<Order> {
        match self.order_writes.get(&order_id) {
            Some(staged) => staged.clone(),
            None => self.store.tables.read().await.orders.get(&order_id).cloned(),
        }
    }
}

#[async_trait]
impl StockLedger for InMemoryTransaction {
    async fn lock_and_read(
        &mut self,
        restaurant_id: RestaurantId,
        stock_name: &str,
    ) -> Result<Option<i64>> {
        self.acquire(RowKey::Stock(restaurant_id, stock_name.to_string()))
            .await?;
        Ok(self
            .current_quantity(&(restaurant_id, stock_name.to_string()))
            .await)
    }

    async fn apply_delta(
        &mut self,
        restaurant_id: RestaurantId,
        stock_name: &str,
        delta: i64,
    ) -> Result<()> {
        if !self
            .held
            .contains_key(&RowKey::Stock(restaurant_id, stock_name.to_string()))
        {
            return Err(StoreError::LockNotHeld {
                stock_name: stock_name.to_string(),
            });
        }

        let key = (restaurant_id, stock_name.to_string());
        let Some(available) = self.current_quantity(&key).await else {
            return Ok(());
        };
        let Some(after) = available.checked_add(delta) else {
            return Err(StoreError::StockOverflow {
                stock_name: stock_name.to_string(),
                delta,
            });
        };
        if after < 0 {
            return Err(StoreError::NegativeStock {
                stock_name: stock_name.to_string(),
                available,
                delta,
            });
        }
        *self.stock_deltas.entry(key).or_insert(0) += delta;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryTransaction {
    async fn get_for_update(
        &mut self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<Order>> {
        self.acquire(RowKey::Order(order_id)).await?;
        Ok(self
            .current_order(order_id)
            .await
            .filter(|o| o.restaurant_id == restaurant_id))
    }

    async fn create(&mut self, order: &Order) -> Result<OrderId> {
        self.acquire(RowKey::Order(order.id)).await?;
        self.order_writes.insert(order.id, Some(order.clone()));
        Ok(order.id)
    }

    async fn replace_lines(
        &mut self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
        table_identifier: &str,
        lines: &[OrderLine],
        total: Money,
    ) -> Result<()> {
        self.acquire(RowKey::Order(order_id)).await?;
        let mut order = self
            .current_order(order_id)
            .await
            .filter(|o| o.restaurant_id == restaurant_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        order.table_identifier = table_identifier.to_string();
        order.lines = lines.to_vec();
        order.total_amount = total;
        order.updated_at = Utc::now();
        self.order_writes.insert(order_id, Some(order));
        Ok(())
    }

    async fn delete(&mut self, order_id: OrderId, restaurant_id: RestaurantId) -> Result<()> {
        self.acquire(RowKey::Order(order_id)).await?;
        if self
            .current_order(order_id)
            .await
            .filter(|o| o.restaurant_id == restaurant_id)
            .is_none()
        {
            return Err(StoreError::OrderNotFound(order_id));
        }
        self.order_writes.insert(order_id, None);
        Ok(())
    }
}

#[async_trait]
impl AuditLedger for InMemoryTransaction {
    async fn record(&mut self, record: &AuditRecord) -> Result<()> {
        if self.store.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(StoreError::AuditRejected(format!(
                "audit ledger unavailable for order {}",
                record.order_id
            )));
        }
        self.audit.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut tables = this.store.tables.write().await;
        let now = Utc::now();

        for (key, delta) in this.stock_deltas {
            if let Some(entry) = tables.stock.get_mut(&key) {
                // apply_delta already bounded committed + staged under the row lock
                entry.quantity = entry.quantity.saturating_add(delta);
                entry.updated_at = now;
            }
        }
        for (order_id, write) in this.order_writes {
            match write {
                Some(order) => {
                    tables.orders.insert(order_id, order);
                }
                None => {
                    tables.orders.remove(&order_id);
                }
            }
        }
        tables.audit.extend(this.audit);

        // Row locks in `this.held` are released when it drops here.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
