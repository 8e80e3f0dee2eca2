//! Stock level endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{MenuCatalog, StockEntry};
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;
use crate::identity::Principal;
use crate::routes::orders::AppState;

#[derive(Deserialize)]
pub struct RestockRequest {
    pub quantity: i64,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub stock_name: String,
    pub quantity: i64,
    pub updated_at: String,
}

impl From<StockEntry> for StockResponse {
    fn from(entry: StockEntry) -> Self {
        Self {
            stock_name: entry.stock_name,
            quantity: entry.quantity,
            updated_at: entry.updated_at.to_rfc3339(),
        }
    }
}

/// GET /stock/{name} — current quantity of a tracked stock pool.
#[tracing::instrument(skip(state, ctx))]
pub async fn get<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
    Path(name): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let entry = state
        .orders
        .stock_level(&ctx, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Stock '{name}' is not tracked")))?;
    Ok(Json(entry.into()))
}

/// PUT /stock/{name} — set the quantity of a stock pool.
#[tracing::instrument(skip(state, ctx, req))]
pub async fn put<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
    Path(name): Path<String>,
    Json(req): Json<RestockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let entry = state.orders.restock(&ctx, &name, req.quantity).await?;
    Ok(Json(entry.into()))
}
