//! Persistence for the order mutation core.
//!
//! Three storage components share one open transaction:
//! - [`StockLedger`]: per-(restaurant, stock name) counters with row locks
//! - [`OrderStore`]: the order aggregate, scoped by restaurant
//! - [`AuditLedger`]: append-only prior-state snapshots
//!
//! [`Store`] begins transactions and serves read-only queries. Two backends
//! are provided: [`PostgresStore`] and [`InMemoryStore`].

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{ActorId, ItemId, OrderId, RestaurantId};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use model::{
    AuditAction, AuditRecord, Money, Order, OrderLine, OrderSnapshot, OrderStatus, StockEntry,
};
pub use postgres::PostgresStore;
pub use query::AuditQuery;
pub use store::{AuditLedger, OrderStore, StockLedger, Store, Transaction};
