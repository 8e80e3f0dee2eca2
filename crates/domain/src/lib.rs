//! Order mutation core.
//!
//! This crate provides:
//! - the [`MenuCatalog`] contract for resolving item ids to name, price and stock pool
//! - the stock delta planner that turns line changes into per-pool ledger deltas
//! - [`OrderMutationService`], which places, updates and cancels orders as single
//!   transactions over the stock ledger, order store and audit ledger

pub mod catalog;
pub mod context;
pub mod error;
pub mod order;

pub use catalog::{
    CatalogError, InMemoryMenuCatalog, MenuCatalog, MenuItem, PostgresMenuCatalog, ResolvedItem,
};
pub use context::{ActorRole, MutationContext};
pub use error::OrderError;
pub use order::{
    CancelOrder, OrderMutationService, PlaceOrder, RequestedLine, StockPlan, UpdateOrder,
};
pub use store::{AuditAction, AuditRecord, Money, Order, OrderLine, OrderStatus, StockEntry};
