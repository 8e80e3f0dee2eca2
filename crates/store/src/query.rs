use chrono::{DateTime, Utc};

use crate::{ActorId, AuditAction, OrderId, RestaurantId};

/// Builder for audit ledger queries.
///
/// The restaurant scope is mandatory; every other filter is optional.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    /// Tenant scope.
    pub restaurant_id: RestaurantId,

    /// Filter by order.
    pub order_id: Option<OrderId>,

    /// Filter by the actor who made the change.
    pub changed_by: Option<ActorId>,

    /// Filter by kind of change.
    pub action: Option<AuditAction>,

    /// Records changed at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Records changed at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of records to return.
    pub limit: Option<usize>,

    /// Number of records to skip.
    pub offset: Option<usize>,
}

impl AuditQuery {
    /// Creates a query over every audit record of a restaurant.
    pub fn for_restaurant(restaurant_id: RestaurantId) -> Self {
        Self {
            restaurant_id,
            order_id: None,
            changed_by: None,
            action: None,
            from_timestamp: None,
            to_timestamp: None,
            limit: None,
            offset: None,
        }
    }

    /// Creates a query for the history of a single order.
    pub fn for_order(restaurant_id: RestaurantId, order_id: OrderId) -> Self {
        Self::for_restaurant(restaurant_id).order_id(order_id)
    }

    pub fn order_id(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn changed_by(mut self, actor: ActorId) -> Self {
        self.changed_by = Some(actor);
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}
