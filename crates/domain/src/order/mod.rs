//! Order commands, stock planning and the mutation service.

mod commands;
mod plan;
mod service;

pub use commands::*;
pub use plan::StockPlan;
pub use service::OrderMutationService;
