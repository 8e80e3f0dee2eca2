//! Order placement, editing, cancellation and audit endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{
    AuditRecord, CancelOrder, MenuCatalog, Order, OrderMutationService, OrderStatus, PlaceOrder,
    RequestedLine, UpdateOrder,
};
use serde::{Deserialize, Serialize};
use store::{OrderSnapshot, Store};

use crate::error::ApiError;
use crate::identity::Principal;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store, C: MenuCatalog> {
    pub orders: OrderMutationService<S, C>,
    /// Storage backend name reported by `/health`.
    pub backend: &'static str,
}

// -- Request types --

#[derive(Deserialize)]
pub struct OrderRequest {
    pub table_identifier: String,
    pub items: Vec<LineRequest>,
}

#[derive(Deserialize)]
pub struct LineRequest {
    pub item_id: i64,
    pub quantity: i64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct MutationResponse {
    pub order_id: String,
    pub total_cents: i64,
    pub status: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub table_identifier: String,
    pub status: String,
    pub lines: Vec<LineResponse>,
    pub total_cents: i64,
    pub placed_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct LineResponse {
    pub item_id: i64,
    pub item_name: String,
    pub stock_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub notes: String,
}

#[derive(Serialize)]
pub struct AuditRecordResponse {
    pub id: String,
    pub action: String,
    pub changed_by: String,
    pub changed_at: String,
    pub remark: String,
    pub prior_snapshot: OrderSnapshot,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            table_identifier: order.table_identifier,
            status: order.status.to_string(),
            lines: order
                .lines
                .into_iter()
                .map(|line| LineResponse {
                    item_id: line.item_id.as_i64(),
                    unit_price_cents: line.unit_price.cents(),
                    item_name: line.item_name,
                    stock_name: line.stock_name,
                    quantity: line.quantity,
                    notes: line.notes,
                })
                .collect(),
            total_cents: order.total_amount.cents(),
            placed_by: order.placed_by.to_string(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

impl From<AuditRecord> for AuditRecordResponse {
    fn from(record: AuditRecord) -> Self {
        Self {
            id: record.id.to_string(),
            action: record.action.as_str().to_string(),
            changed_by: record.changed_by.to_string(),
            changed_at: record.changed_at.to_rfc3339(),
            remark: record.remark,
            prior_snapshot: record.prior_snapshot,
        }
    }
}

// -- Handlers --

/// POST /orders — place a new order.
#[tracing::instrument(skip(state, ctx, req))]
pub async fn create<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
    Json(req): Json<OrderRequest>,
) -> Result<(StatusCode, Json<MutationResponse>), ApiError> {
    let lines = requested_lines(req.items)?;
    let order = state
        .orders
        .place(&ctx, PlaceOrder::new(req.table_identifier, lines))
        .await?;

    let response = MutationResponse {
        order_id: order.id.to_string(),
        total_cents: order.total_amount.cents(),
        status: order.status.to_string(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders — list the caller's orders, newest first.
#[tracing::instrument(skip(state, ctx))]
pub async fn list<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.orders.list_orders(&ctx).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id} — load one order.
#[tracing::instrument(skip(state, ctx))]
pub async fn get<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.get_order(&ctx, order_id).await?;
    Ok(Json(order.into()))
}

/// PUT /orders/{id} — replace the lines and table of an order.
#[tracing::instrument(skip(state, ctx, req))]
pub async fn update<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
    Path(id): Path<String>,
    Json(req): Json<OrderRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let lines = requested_lines(req.items)?;
    let order = state
        .orders
        .update(&ctx, UpdateOrder::new(order_id, req.table_identifier, lines))
        .await?;

    Ok(Json(MutationResponse {
        order_id: order.id.to_string(),
        total_cents: order.total_amount.cents(),
        status: order.status.to_string(),
    }))
}

/// DELETE /orders/{id} — cancel an order and restore its stock.
#[tracing::instrument(skip(state, ctx))]
pub async fn cancel<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.cancel(&ctx, CancelOrder::new(order_id)).await?;

    Ok(Json(MutationResponse {
        order_id: order.id.to_string(),
        total_cents: order.total_amount.cents(),
        status: "cancelled".to_string(),
    }))
}

/// POST /orders/{id}/status — move an order to another status.
#[tracing::instrument(skip(state, ctx, req))]
pub async fn set_status<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let status: OrderStatus = req.status.parse().map_err(ApiError::BadRequest)?;
    let order = state.orders.mark_status(&ctx, order_id, status).await?;
    Ok(Json(order.into()))
}

/// GET /orders/{id}/audit — prior states recorded for an order, oldest first.
#[tracing::instrument(skip(state, ctx))]
pub async fn audit<S: Store + 'static, C: MenuCatalog + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Principal(ctx): Principal,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuditRecordResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let records = state.orders.audit_trail(&ctx, order_id).await?;
    Ok(Json(
        records.into_iter().map(AuditRecordResponse::from).collect(),
    ))
}

fn requested_lines(items: Vec<LineRequest>) -> Result<Vec<RequestedLine>, ApiError> {
    items
        .into_iter()
        .map(|item| {
            let quantity = u32::try_from(item.quantity).map_err(|_| {
                ApiError::BadRequest(format!(
                    "quantity for item {} must be between 1 and {}, got {}",
                    item.item_id,
                    u32::MAX,
                    item.quantity
                ))
            })?;
            Ok(RequestedLine::new(item.item_id, quantity).with_notes(item.notes))
        })
        .collect()
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(OrderId::from(uuid))
}
