//! HTTP API for order placement, editing and cancellation.
//!
//! Exposes the order mutation service over REST, with caller identity taken
//! from gateway headers, structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::RestaurantId;
use domain::{InMemoryMenuCatalog, MenuCatalog, MenuItem, Money, OrderMutationService};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryStore, Store};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use routes::orders::AppState;

/// Restaurant seeded with a menu when running without a database.
pub const DEMO_RESTAURANT_ID: Uuid = Uuid::from_u128(1);

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + 'static, C: MenuCatalog + 'static>(
    state: Arc<AppState<S, C>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health::<S, C>))
        .route(
            "/orders",
            post(routes::orders::create::<S, C>).get(routes::orders::list::<S, C>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S, C>)
                .put(routes::orders::update::<S, C>)
                .delete(routes::orders::cancel::<S, C>),
        )
        .route(
            "/orders/{id}/status",
            post(routes::orders::set_status::<S, C>),
        )
        .route("/orders/{id}/audit", get(routes::orders::audit::<S, C>))
        .route(
            "/stock/{name}",
            get(routes::stock::get::<S, C>).put(routes::stock::put::<S, C>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wraps a store and catalog into application state.
pub fn create_state<S: Store, C: MenuCatalog>(
    store: S,
    catalog: C,
    backend: &'static str,
) -> Arc<AppState<S, C>> {
    Arc::new(AppState {
        orders: OrderMutationService::new(store, catalog),
        backend,
    })
}

/// Creates in-memory state with a demo menu and stock for [`DEMO_RESTAURANT_ID`].
pub async fn create_demo_state(
    store: InMemoryStore,
) -> Result<Arc<AppState<InMemoryStore, InMemoryMenuCatalog>>, store::StoreError> {
    let restaurant_id = RestaurantId::from_uuid(DEMO_RESTAURANT_ID);
    let catalog = InMemoryMenuCatalog::new();
    for item in [
        MenuItem::new(1, "Coke", Money::from_cents(150)),
        MenuItem::new(2, "Masala Tea", Money::from_cents(80)),
        MenuItem::new(3, "Chicken Momo (half)", Money::from_cents(250)).with_stock_pool("Chicken Momo"),
        MenuItem::new(4, "Chicken Momo (full)", Money::from_cents(450)).with_stock_pool("Chicken Momo"),
        MenuItem::new(5, "Dal Bhat", Money::from_cents(600)),
    ] {
        catalog.add_item(restaurant_id, item);
    }

    store.set_stock(restaurant_id, "Coke", 48).await?;
    store.set_stock(restaurant_id, "Chicken Momo", 30).await?;

    Ok(create_state(store, catalog, "memory"))
}
