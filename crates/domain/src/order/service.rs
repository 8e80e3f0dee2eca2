//! Order mutation service: place, update and cancel as single transactions.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::Utc;
use common::{ItemId, OrderId};
use store::{
    AuditAction, AuditQuery, AuditRecord, Order, OrderLine, OrderStatus, StockEntry, Store,
    Transaction,
};

use crate::catalog::{MenuCatalog, ResolvedItem};
use crate::context::MutationContext;
use crate::error::{OrderError, stock_overflow_message};

use super::{CancelOrder, PlaceOrder, RequestedLine, StockPlan, UpdateOrder};

/// Service for mutating orders against a stock ledger.
///
/// Every mutation runs in one store transaction. Locks are taken in a fixed
/// order: the order row first (update, cancel), then stock rows by ascending
/// stock name. Any error rolls the whole transaction back before it is
/// returned.
pub struct OrderMutationService<S: Store, C: MenuCatalog> {
    store: S,
    catalog: C,
}

impl<S: Store, C: MenuCatalog> OrderMutationService<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Places a new order.
    ///
    /// Unknown or unavailable items are dropped from the order; it is only
    /// rejected when nothing orderable remains.
    #[tracing::instrument(
        skip(self, ctx, cmd),
        fields(restaurant_id = %ctx.restaurant_id, actor_id = %ctx.actor_id, table = %cmd.table_identifier)
    )]
    pub async fn place(&self, ctx: &MutationContext, cmd: PlaceOrder) -> Result<Order, OrderError> {
        let started = Instant::now();
        let result = self.place_order(ctx, cmd).await;
        record_outcome("place", started, &result);
        result
    }

    /// Replaces the lines and table of a mutable order.
    ///
    /// Every requested item must resolve. Stock is only checked for the
    /// increase over what the order already holds.
    #[tracing::instrument(
        skip(self, ctx, cmd),
        fields(restaurant_id = %ctx.restaurant_id, actor_id = %ctx.actor_id, order_id = %cmd.order_id)
    )]
    pub async fn update(
        &self,
        ctx: &MutationContext,
        cmd: UpdateOrder,
    ) -> Result<Order, OrderError> {
        let started = Instant::now();
        let result = self.update_order(ctx, cmd).await;
        record_outcome("update", started, &result);
        result
    }

    /// Cancels a mutable order, restoring all of its stock.
    ///
    /// Returns the order as it was before deletion.
    #[tracing::instrument(
        skip(self, ctx, cmd),
        fields(restaurant_id = %ctx.restaurant_id, actor_id = %ctx.actor_id, order_id = %cmd.order_id)
    )]
    pub async fn cancel(&self, ctx: &MutationContext, cmd: CancelOrder) -> Result<Order, OrderError> {
        let started = Instant::now();
        let result = self.cancel_order(ctx, cmd).await;
        record_outcome("cancel", started, &result);
        result
    }

    /// Loads an order of the caller's restaurant.
    pub async fn get_order(
        &self,
        ctx: &MutationContext,
        order_id: OrderId,
    ) -> Result<Order, OrderError> {
        self.store
            .get_order(order_id, ctx.restaurant_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    /// Lists the caller's orders, newest first.
    pub async fn list_orders(&self, ctx: &MutationContext) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.list_orders(ctx.restaurant_id).await?)
    }

    /// Returns the audit records of an order, oldest first.
    ///
    /// Records outlive the order, so a cancelled order still has a trail.
    pub async fn audit_trail(
        &self,
        ctx: &MutationContext,
        order_id: OrderId,
    ) -> Result<Vec<AuditRecord>, OrderError> {
        Ok(self
            .store
            .list_audit(AuditQuery::for_order(ctx.restaurant_id, order_id))
            .await?)
    }

    /// Moves an order to another status without touching its lines.
    #[tracing::instrument(skip(self, ctx), fields(restaurant_id = %ctx.restaurant_id))]
    pub async fn mark_status(
        &self,
        ctx: &MutationContext,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, OrderError> {
        let order = self
            .store
            .set_status(order_id, ctx.restaurant_id, status)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;
        tracing::info!(%order_id, %status, "order status changed");
        Ok(order)
    }

    pub async fn stock_level(
        &self,
        ctx: &MutationContext,
        stock_name: &str,
    ) -> Result<Option<StockEntry>, OrderError> {
        Ok(self.store.stock_level(ctx.restaurant_id, stock_name).await?)
    }

    /// Sets the quantity of a stock pool, starting to track it if needed.
    #[tracing::instrument(skip(self, ctx), fields(restaurant_id = %ctx.restaurant_id))]
    pub async fn restock(
        &self,
        ctx: &MutationContext,
        stock_name: &str,
        quantity: i64,
    ) -> Result<StockEntry, OrderError> {
        if stock_name.trim().is_empty() {
            return Err(OrderError::Validation("stock name is required".to_string()));
        }
        if quantity < 0 {
            return Err(OrderError::Validation(format!(
                "stock quantity must not be negative, got {quantity}"
            )));
        }
        let entry = self
            .store
            .set_stock(ctx.restaurant_id, stock_name, quantity)
            .await?;
        tracing::info!(quantity, "stock level set");
        Ok(entry)
    }

    async fn place_order(&self, ctx: &MutationContext, cmd: PlaceOrder) -> Result<Order, OrderError> {
        cmd.validate()?;

        let resolved = self
            .catalog
            .resolve_items(ctx.restaurant_id, &distinct_item_ids(&cmd.lines))
            .await?;
        let lines: Vec<OrderLine> = cmd
            .lines
            .iter()
            .filter_map(|line| resolved.get(&line.item_id).map(|item| price_line(line, item)))
            .collect();

        let dropped = cmd.lines.len() - lines.len();
        if dropped > 0 {
            tracing::warn!(dropped, "dropping unresolved items from new order");
        }
        if lines.is_empty() {
            return Err(OrderError::Validation(
                "none of the requested items are available".to_string(),
            ));
        }

        let now = Utc::now();
        let order = Order {
            id: OrderId::new(),
            restaurant_id: ctx.restaurant_id,
            table_identifier: cmd.table_identifier,
            total_amount: lines.iter().map(OrderLine::line_total).sum(),
            lines,
            status: OrderStatus::Preparing,
            created_at: now,
            updated_at: now,
            placed_by: ctx.actor_id,
        };
        let plan = StockPlan::for_place(&order.lines);

        let mut tx = self.store.begin().await?;
        let result = place_in(tx.as_mut(), ctx, &order, &plan).await;
        finish(tx, result).await?;

        tracing::info!(order_id = %order.id, total = %order.total_amount, "order placed");
        Ok(order)
    }

    async fn update_order(
        &self,
        ctx: &MutationContext,
        cmd: UpdateOrder,
    ) -> Result<Order, OrderError> {
        cmd.validate()?;

        let mut tx = self.store.begin().await?;
        let result = self.update_in(tx.as_mut(), ctx, cmd).await;
        let order = finish(tx, result).await?;

        tracing::info!(order_id = %order.id, total = %order.total_amount, "order updated");
        Ok(order)
    }

    async fn update_in(
        &self,
        tx: &mut dyn Transaction,
        ctx: &MutationContext,
        cmd: UpdateOrder,
    ) -> Result<Order, OrderError> {
        let current = load_mutable(tx, ctx, cmd.order_id).await?;

        let requested = distinct_item_ids(&cmd.lines);
        let resolved = self
            .catalog
            .resolve_items(ctx.restaurant_id, &requested)
            .await?;
        if resolved.len() != requested.len() {
            let item_ids = requested
                .into_iter()
                .filter(|id| !resolved.contains_key(id))
                .collect();
            return Err(OrderError::InvalidItems { item_ids });
        }

        let lines: Vec<OrderLine> = cmd
            .lines
            .iter()
            .filter_map(|line| resolved.get(&line.item_id).map(|item| price_line(line, item)))
            .collect();
        let total = lines.iter().map(OrderLine::line_total).sum();
        let plan = StockPlan::for_update(&current.lines, &lines);

        lock_and_check(tx, ctx, &plan).await?;

        let remark = format!("Order updated by {}", ctx.role);
        tx.record(&AuditRecord::capture(
            &current,
            AuditAction::Updated,
            ctx.actor_id,
            remark,
        ))
        .await?;

        apply_plan(tx, ctx, &plan).await?;
        tx.replace_lines(
            current.id,
            ctx.restaurant_id,
            &cmd.table_identifier,
            &lines,
            total,
        )
        .await?;

        Ok(Order {
            table_identifier: cmd.table_identifier,
            lines,
            total_amount: total,
            updated_at: Utc::now(),
            ..current
        })
    }

    async fn cancel_order(
        &self,
        ctx: &MutationContext,
        cmd: CancelOrder,
    ) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let result = cancel_in(tx.as_mut(), ctx, cmd.order_id).await;
        let order = finish(tx, result).await?;

        tracing::info!(order_id = %order.id, "order cancelled");
        Ok(order)
    }
}

async fn place_in(
    tx: &mut dyn Transaction,
    ctx: &MutationContext,
    order: &Order,
    plan: &StockPlan,
) -> Result<(), OrderError> {
    lock_and_check(tx, ctx, plan).await?;
    apply_plan(tx, ctx, plan).await?;
    tx.create(order).await?;
    Ok(())
}

async fn cancel_in(
    tx: &mut dyn Transaction,
    ctx: &MutationContext,
    order_id: OrderId,
) -> Result<Order, OrderError> {
    let current = load_mutable(tx, ctx, order_id).await?;

    let remark = format!("Order cancelled by {}", ctx.role);
    tx.record(&AuditRecord::capture(
        &current,
        AuditAction::Cancelled,
        ctx.actor_id,
        remark,
    ))
    .await?;

    let plan = StockPlan::for_cancel(&current.lines);
    lock_and_check(tx, ctx, &plan).await?;
    apply_plan(tx, ctx, &plan).await?;
    tx.delete(order_id, ctx.restaurant_id).await?;

    Ok(current)
}

/// Locks the order row and checks that the caller may still change it.
async fn load_mutable(
    tx: &mut dyn Transaction,
    ctx: &MutationContext,
    order_id: OrderId,
) -> Result<Order, OrderError> {
    let order = tx
        .get_for_update(order_id, ctx.restaurant_id)
        .await?
        .ok_or(OrderError::NotFound(order_id))?;

    if !order.status.is_mutable() {
        if !ctx.role.bypasses_status_check() {
            return Err(OrderError::InvalidState {
                order_id,
                status: order.status,
            });
        }
        tracing::warn!(%order_id, status = %order.status, "superadmin changing closed order");
    }
    Ok(order)
}

/// Locks every pool in the plan and validates consumption against the locked
/// quantities. Nothing is written.
async fn lock_and_check(
    tx: &mut dyn Transaction,
    ctx: &MutationContext,
    plan: &StockPlan,
) -> Result<(), OrderError> {
    for (stock_name, delta) in plan.deltas() {
        let Some(available) = tx.lock_and_read(ctx.restaurant_id, stock_name).await? else {
            continue;
        };
        let Some(after) = available.checked_add(delta) else {
            return Err(OrderError::Validation(stock_overflow_message(
                stock_name, delta,
            )));
        };
        if after < 0 {
            metrics::counter!("stock_insufficient_total").increment(1);
            tracing::info!(stock_name, available, required = -delta, "insufficient stock");
            return Err(OrderError::InsufficientStock {
                item: stock_name.to_string(),
                available,
                required: -delta,
            });
        }
    }
    Ok(())
}

async fn apply_plan(
    tx: &mut dyn Transaction,
    ctx: &MutationContext,
    plan: &StockPlan,
) -> Result<(), OrderError> {
    for (stock_name, delta) in plan.deltas() {
        tx.apply_delta(ctx.restaurant_id, stock_name, delta).await?;
    }
    Ok(())
}

/// Commits on success, rolls back on error.
async fn finish<T>(
    tx: Box<dyn Transaction>,
    result: Result<T, OrderError>,
) -> Result<T, OrderError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

fn distinct_item_ids(lines: &[RequestedLine]) -> Vec<ItemId> {
    lines
        .iter()
        .map(|line| line.item_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn price_line(line: &RequestedLine, item: &ResolvedItem) -> OrderLine {
    OrderLine {
        item_id: item.item_id,
        item_name: item.name.clone(),
        stock_name: item.stock_name.clone(),
        quantity: line.quantity,
        unit_price: item.price,
        notes: line.notes.clone(),
    }
}

fn record_outcome<T>(operation: &'static str, started: Instant, result: &Result<T, OrderError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(err) => err.kind(),
    };
    metrics::counter!("order_mutations_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("order_mutation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());

    if let Err(err) = result {
        tracing::warn!(operation, kind = err.kind(), error = %err, "order mutation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryMenuCatalog, MenuItem};
    use crate::context::ActorRole;
    use common::{ActorId, RestaurantId};
    use store::{InMemoryStore, Money};

    fn setup() -> (
        OrderMutationService<InMemoryStore, InMemoryMenuCatalog>,
        MutationContext,
    ) {
        let ctx = MutationContext::new(RestaurantId::new(), ActorId::new(), ActorRole::Staff);
        let catalog = InMemoryMenuCatalog::new();
        catalog.add_item(ctx.restaurant_id, MenuItem::new(1, "Coke", Money::from_cents(150)));
        catalog.add_item(ctx.restaurant_id, MenuItem::new(2, "Momo", Money::from_cents(400)));
        (
            OrderMutationService::new(InMemoryStore::new(), catalog),
            ctx,
        )
    }

    #[tokio::test]
    async fn place_prices_lines_and_consumes_stock() {
        let (service, ctx) = setup();
        service.restock(&ctx, "Coke", 10).await.unwrap();

        let order = service
            .place(
                &ctx,
                PlaceOrder::new(
                    "T1",
                    vec![RequestedLine::new(1, 3), RequestedLine::new(2, 1).with_notes("spicy")],
                ),
            )
            .await
            .unwrap();

        assert_eq!(order.total_amount, Money::from_cents(850));
        assert_eq!(order.status, OrderStatus::Preparing);
        assert_eq!(order.lines[1].notes, "spicy");
        let coke = service.stock_level(&ctx, "Coke").await.unwrap().unwrap();
        assert_eq!(coke.quantity, 7);
        // Momo is untracked
        assert!(service.stock_level(&ctx, "Momo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn place_with_only_unknown_items_is_rejected() {
        let (service, ctx) = setup();
        let err = service
            .place(&ctx, PlaceOrder::new("T1", vec![RequestedLine::new(99, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
        assert_eq!(service.store().order_count().await, 0);
    }

    #[tokio::test]
    async fn update_rejects_unknown_items_listing_them() {
        let (service, ctx) = setup();
        let order = service
            .place(&ctx, PlaceOrder::new("T1", vec![RequestedLine::new(1, 1)]))
            .await
            .unwrap();

        let err = service
            .update(
                &ctx,
                UpdateOrder::new(
                    order.id,
                    "T1",
                    vec![RequestedLine::new(1, 1), RequestedLine::new(7, 1)],
                ),
            )
            .await
            .unwrap_err();
        match err {
            OrderError::InvalidItems { item_ids } => assert_eq!(item_ids, vec![ItemId::new(7)]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(service.store().audit_count().await, 0);
    }

    #[tokio::test]
    async fn mark_status_blocks_later_edits() {
        let (service, ctx) = setup();
        let order = service
            .place(&ctx, PlaceOrder::new("T1", vec![RequestedLine::new(1, 1)]))
            .await
            .unwrap();
        service
            .mark_status(&ctx, order.id, OrderStatus::Served)
            .await
            .unwrap();

        let err = service
            .cancel(&ctx, CancelOrder::new(order.id))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidState {
                status: OrderStatus::Served,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn restock_rejects_negative_quantity() {
        let (service, ctx) = setup();
        let err = service.restock(&ctx, "Coke", -1).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn cancel_into_a_full_pool_is_rejected_without_changes() {
        let (service, ctx) = setup();
        service.restock(&ctx, "Coke", 10).await.unwrap();
        let order = service
            .place(&ctx, PlaceOrder::new("T1", vec![RequestedLine::new(1, 3)]))
            .await
            .unwrap();
        service.restock(&ctx, "Coke", i64::MAX).await.unwrap();

        let err = service
            .cancel(&ctx, CancelOrder::new(order.id))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));

        let coke = service.stock_level(&ctx, "Coke").await.unwrap().unwrap();
        assert_eq!(coke.quantity, i64::MAX);
        assert!(service.get_order(&ctx, order.id).await.is_ok());
        assert_eq!(service.store().audit_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let (service, ctx) = setup();
        let missing = OrderId::new();
        assert!(matches!(
            service.get_order(&ctx, missing).await,
            Err(OrderError::NotFound(id)) if id == missing
        ));
        assert!(matches!(
            service.mark_status(&ctx, missing, OrderStatus::Archived).await,
            Err(OrderError::NotFound(_))
        ));
    }
}
