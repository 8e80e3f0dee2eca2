//! Order mutations against PostgreSQL.
//!
//! Uses one shared container. Run with:
//!
//! ```bash
//! cargo test -p domain --test postgres_mutation -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{ActorId, ItemId, RestaurantId};
use domain::{
    ActorRole, CancelOrder, MutationContext, OrderError, OrderMutationService, PlaceOrder,
    PostgresMenuCatalog, RequestedLine, UpdateOrder,
};
use sqlx::PgPool;
use store::{PostgresStore, StockLedger, Store, Transaction};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_order_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

type PgService = OrderMutationService<PostgresStore, PostgresMenuCatalog>;

struct Fixture {
    service: Arc<PgService>,
    ctx: MutationContext,
    coke: i64,
    momo: i64,
}

async fn add_menu_item(
    pool: &PgPool,
    restaurant_id: RestaurantId,
    name: &str,
    price_cents: i64,
    stock_name: Option<&str>,
) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO menu_items (restaurant_id, name, price_cents, stock_name) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(restaurant_id.as_uuid())
    .bind(name)
    .bind(price_cents)
    .bind(stock_name)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn setup() -> Fixture {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    let ctx = MutationContext::new(RestaurantId::new(), ActorId::new(), ActorRole::Admin);
    let coke = add_menu_item(&pool, ctx.restaurant_id, "Coke", 150, None).await;
    let momo = add_menu_item(&pool, ctx.restaurant_id, "Momo (half)", 250, Some("Momo")).await;

    let store = PostgresStore::new(pool.clone()).with_lock_timeout(Duration::from_millis(500));
    let service = OrderMutationService::new(store, PostgresMenuCatalog::new(pool));
    Fixture {
        service: Arc::new(service),
        ctx,
        coke,
        momo,
    }
}

async fn stock(fx: &Fixture, name: &str) -> Option<i64> {
    fx.service
        .stock_level(&fx.ctx, name)
        .await
        .unwrap()
        .map(|entry| entry.quantity)
}

#[tokio::test]
async fn place_update_cancel_round_trip() {
    let fx = setup().await;
    fx.service.restock(&fx.ctx, "Coke", 10).await.unwrap();
    fx.service.restock(&fx.ctx, "Momo", 4).await.unwrap();

    let order = fx
        .service
        .place(
            &fx.ctx,
            PlaceOrder::new(
                "T3",
                vec![
                    RequestedLine::new(fx.coke, 3),
                    RequestedLine::new(fx.momo, 1),
                    RequestedLine::new(-1, 1),
                ],
            ),
        )
        .await
        .unwrap();
    assert_eq!(order.lines.len(), 2);
    assert_eq!(order.total_amount.cents(), 3 * 150 + 250);
    assert_eq!(stock(&fx, "Coke").await, Some(7));
    assert_eq!(stock(&fx, "Momo").await, Some(3));

    fx.service
        .update(
            &fx.ctx,
            UpdateOrder::new(order.id, "T3", vec![RequestedLine::new(fx.coke, 5)]),
        )
        .await
        .unwrap();
    assert_eq!(stock(&fx, "Coke").await, Some(5));
    assert_eq!(stock(&fx, "Momo").await, Some(4));

    fx.service
        .cancel(&fx.ctx, CancelOrder::new(order.id))
        .await
        .unwrap();
    assert_eq!(stock(&fx, "Coke").await, Some(10));

    let trail = fx.service.audit_trail(&fx.ctx, order.id).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].prior_snapshot, order.snapshot());
    assert_eq!(trail[1].remark, "Order cancelled by admin");
}

#[tokio::test]
async fn insufficient_stock_leaves_database_unchanged() {
    let fx = setup().await;
    fx.service.restock(&fx.ctx, "Coke", 4).await.unwrap();
    let order = fx
        .service
        .place(
            &fx.ctx,
            PlaceOrder::new("T1", vec![RequestedLine::new(fx.coke, 3)]),
        )
        .await
        .unwrap();

    let err = fx
        .service
        .update(
            &fx.ctx,
            UpdateOrder::new(order.id, "T2", vec![RequestedLine::new(fx.coke, 5)]),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrderError::InsufficientStock {
            available: 1,
            required: 2,
            ..
        }
    ));
    assert_eq!(stock(&fx, "Coke").await, Some(1));
    let stored = fx.service.get_order(&fx.ctx, order.id).await.unwrap();
    assert_eq!(stored.snapshot(), order.snapshot());
    assert!(
        fx.service
            .audit_trail(&fx.ctx, order.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn update_with_item_of_another_restaurant_is_invalid() {
    let fx = setup().await;
    let other = setup().await;
    let order = fx
        .service
        .place(
            &fx.ctx,
            PlaceOrder::new("T1", vec![RequestedLine::new(fx.coke, 1)]),
        )
        .await
        .unwrap();

    let err = fx
        .service
        .update(
            &fx.ctx,
            UpdateOrder::new(order.id, "T1", vec![RequestedLine::new(other.coke, 1)]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::InvalidItems { ref item_ids } if item_ids == &vec![ItemId::new(other.coke)]
    ));
}

#[tokio::test]
async fn concurrent_increases_never_oversell() {
    let fx = setup().await;
    fx.service.restock(&fx.ctx, "Coke", 6).await.unwrap();
    let mut order_ids = Vec::new();
    for _ in 0..2 {
        let order = fx
            .service
            .place(
                &fx.ctx,
                PlaceOrder::new("T1", vec![RequestedLine::new(fx.coke, 1)]),
            )
            .await
            .unwrap();
        order_ids.push(order.id);
    }

    let handles: Vec<_> = order_ids
        .into_iter()
        .map(|order_id| {
            let service = fx.service.clone();
            let ctx = fx.ctx;
            let coke = fx.coke;
            tokio::spawn(async move {
                service
                    .update(
                        &ctx,
                        UpdateOrder::new(order_id, "T1", vec![RequestedLine::new(coke, 4)]),
                    )
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|r| matches!(r, Err(OrderError::InsufficientStock { .. })))
    );
    assert_eq!(stock(&fx, "Coke").await, Some(1));
}

#[tokio::test]
async fn held_stock_lock_surfaces_as_busy() {
    let fx = setup().await;
    fx.service.restock(&fx.ctx, "Coke", 6).await.unwrap();

    let mut held = fx.service.store().begin().await.unwrap();
    held.lock_and_read(fx.ctx.restaurant_id, "Coke")
        .await
        .unwrap();

    let err = fx
        .service
        .place(
            &fx.ctx,
            PlaceOrder::new("T1", vec![RequestedLine::new(fx.coke, 1)]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::Busy { .. }));

    held.rollback().await.unwrap();
    assert_eq!(stock(&fx, "Coke").await, Some(6));
}
