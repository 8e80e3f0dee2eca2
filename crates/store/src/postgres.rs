use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ActorId, AuditQuery, AuditRecord, Money, Order, OrderId, OrderLine, OrderSnapshot,
    OrderStatus, RestaurantId, Result, StockEntry, StoreError,
    store::{AuditLedger, OrderStore, StockLedger, Store, Transaction},
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATE raised when a BIGINT result leaves its range.
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

const ORDER_COLUMNS: &str = "id, restaurant_id, table_identifier, lines, total_cents, status, created_at, updated_at, placed_by";

/// PostgreSQL-backed store.
///
/// Row locks are taken with `SELECT ... FOR UPDATE` and bounded by a
/// transaction-local `lock_timeout`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long a transaction waits for a row lock before giving up.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens a transaction whose row-lock waits give up after `lock_timeout`.
    async fn begin_locking(&self) -> Result<sqlx::Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters; the value is an integer we format.
        let timeout_ms = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await?;

        Ok(tx)
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let lines: serde_json::Value = row.try_get("lines")?;
        let status: String = row.try_get("status")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            restaurant_id: RestaurantId::from_uuid(row.try_get::<Uuid, _>("restaurant_id")?),
            table_identifier: row.try_get("table_identifier")?,
            lines: serde_json::from_value(lines)?,
            total_amount: Money::from_cents(row.try_get("total_cents")?),
            status: status.parse().map_err(StoreError::InvalidRow)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            placed_by: ActorId::from_uuid(row.try_get::<Uuid, _>("placed_by")?),
        })
    }

    fn row_to_audit(row: PgRow) -> Result<AuditRecord> {
        let snapshot: serde_json::Value = row.try_get("prior_snapshot")?;
        let action: String = row.try_get("action")?;

        Ok(AuditRecord {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            restaurant_id: RestaurantId::from_uuid(row.try_get::<Uuid, _>("restaurant_id")?),
            changed_by: ActorId::from_uuid(row.try_get::<Uuid, _>("changed_by")?),
            changed_at: row.try_get("changed_at")?,
            action: action.parse().map_err(StoreError::InvalidRow)?,
            prior_snapshot: serde_json::from_value::<OrderSnapshot>(snapshot)?,
            remark: row.try_get("remark")?,
        })
    }

    fn row_to_stock(row: PgRow) -> Result<StockEntry> {
        Ok(StockEntry {
            restaurant_id: RestaurantId::from_uuid(row.try_get::<Uuid, _>("restaurant_id")?),
            stock_name: row.try_get("stock_name")?,
            quantity: row.try_get("quantity")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn has_sqlstate(err: &sqlx::Error, code: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(code))
}

/// Maps an expired `lock_timeout` to [`StoreError::LockTimeout`].
fn map_lock_error(err: sqlx::Error, resource: impl FnOnce() -> String) -> StoreError {
    if has_sqlstate(&err, LOCK_NOT_AVAILABLE) {
        return StoreError::LockTimeout {
            resource: resource(),
        };
    }
    StoreError::Database(err)
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.begin_locking().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn get_order(
        &self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND restaurant_id = $2"
        ))
        .bind(order_id.as_uuid())
        .bind(restaurant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_orders(&self, restaurant_id: RestaurantId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE restaurant_id = $1 ORDER BY created_at DESC"
        ))
        .bind(restaurant_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn set_status(
        &self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
        status: OrderStatus,
    ) -> Result<Option<Order>> {
        let mut tx = self.begin_locking().await?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE orders SET status = $3, updated_at = now()
            WHERE id = $1 AND restaurant_id = $2
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(restaurant_id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_lock_error(e, || format!("order {order_id}")))?;
        tx.commit().await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn stock_level(
        &self,
        restaurant_id: RestaurantId,
        stock_name: &str,
    ) -> Result<Option<StockEntry>> {
        let row = sqlx::query(
            r#"
            SELECT restaurant_id, stock_name, quantity, updated_at
            FROM stock_entries
            WHERE restaurant_id = $1 AND stock_name = $2
            "#,
        )
        .bind(restaurant_id.as_uuid())
        .bind(stock_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_stock).transpose()
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

        let row = sqlx::query(
            r#"
            INSERT INTO stock_entries (restaurant_id, stock_name, quantity, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (restaurant_id, stock_name) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            RETURNING restaurant_id, stock_name, quantity, updated_at
            "#,
        )
        .bind(restaurant_id.as_uuid())
        .bind(stock_name)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_stock(row)
    }

    async fn list_audit(&self, query: AuditQuery) -> Result<Vec<AuditRecord>> {
        let mut sql = String::from(
            "SELECT id, order_id, restaurant_id, changed_by, changed_at, action, prior_snapshot, remark FROM order_audit WHERE restaurant_id = $1",
        );
        let mut param_count = 1;

        if query.order_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND order_id = ${param_count}"));
        }
        if query.changed_by.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND changed_by = ${param_count}"));
        }
        if query.action.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND action = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND changed_at >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND changed_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY changed_at ASC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql).bind(query.restaurant_id.as_uuid());

        if let Some(order_id) = query.order_id {
            sqlx_query = sqlx_query.bind(order_id.as_uuid());
        }
        if let Some(actor) = query.changed_by {
            sqlx_query = sqlx_query.bind(actor.as_uuid());
        }
        if let Some(action) = query.action {
            sqlx_query = sqlx_query.bind(action.as_str());
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_audit).collect()
    }
}

/// A unit of work against [`PostgresStore`], backed by one database transaction.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StockLedger for PgTransaction {
    async fn lock_and_read(
        &mut self,
        restaurant_id: RestaurantId,
        stock_name: &str,
    ) -> Result<Option<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT quantity FROM stock_entries
            WHERE restaurant_id = $1 AND stock_name = $2
            FOR UPDATE
            "#,
        )
        .bind(restaurant_id.as_uuid())
        .bind(stock_name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_lock_error(e, || format!("stock '{stock_name}' of {restaurant_id}")))
    }

    async fn apply_delta(
        &mut self,
        restaurant_id: RestaurantId,
        stock_name: &str,
        delta: i64,
    ) -> Result<()> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE stock_entries SET quantity = quantity + $3, updated_at = now()
            WHERE restaurant_id = $1 AND stock_name = $2 AND quantity + $3 >= 0
            RETURNING quantity
            "#,
        )
        .bind(restaurant_id.as_uuid())
        .bind(stock_name)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| {
            if has_sqlstate(&e, NUMERIC_VALUE_OUT_OF_RANGE) {
                return StoreError::StockOverflow {
                    stock_name: stock_name.to_string(),
                    delta,
                };
            }
            map_lock_error(e, || format!("stock '{stock_name}' of {restaurant_id}"))
        })?;

        if updated.is_some() {
            return Ok(());
        }

        // Either the row is untracked (no-op) or the guard rejected the delta.
        let available: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM stock_entries WHERE restaurant_id = $1 AND stock_name = $2",
        )
        .bind(restaurant_id.as_uuid())
        .bind(stock_name)
        .fetch_optional(&mut *self.tx)
        .await?;

        match available {
            None => Ok(()),
            Some(available) => Err(StoreError::NegativeStock {
                stock_name: stock_name.to_string(),
                available,
                delta,
            }),
        }
    }
}

#[async_trait]
impl OrderStore for PgTransaction {
    async fn get_for_update(
        &mut self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND restaurant_id = $2 FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .bind(restaurant_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_lock_error(e, || format!("order {order_id}")))?;

        row.map(PostgresStore::row_to_order).transpose()
    }

    async fn create(&mut self, order: &Order) -> Result<OrderId> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, restaurant_id, table_identifier, lines, total_cents, status, created_at, updated_at, placed_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.restaurant_id.as_uuid())
        .bind(&order.table_identifier)
        .bind(serde_json::to_value(&order.lines)?)
        .bind(order.total_amount.cents())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.placed_by.as_uuid())
        .execute(&mut *self.tx)
        .await?;

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
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET table_identifier = $3, lines = $4, total_cents = $5, updated_at = $6
            WHERE id = $1 AND restaurant_id = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(restaurant_id.as_uuid())
        .bind(table_identifier)
        .bind(serde_json::to_value(lines)?)
        .bind(total.cents())
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_lock_error(e, || format!("order {order_id}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn delete(&mut self, order_id: OrderId, restaurant_id: RestaurantId) -> Result<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1 AND restaurant_id = $2")
            .bind(order_id.as_uuid())
            .bind(restaurant_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_lock_error(e, || format!("order {order_id}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLedger for PgTransaction {
    async fn record(&mut self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_audit (id, order_id, restaurant_id, changed_by, changed_at, action, prior_snapshot, remark)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.order_id.as_uuid())
        .bind(record.restaurant_id.as_uuid())
        .bind(record.changed_by.as_uuid())
        .bind(record.changed_at)
        .bind(record.action.as_str())
        .bind(serde_json::to_value(&record.prior_snapshot)?)
        .bind(&record.remark)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
