//! Caller context for mutations.
//!
//! Identity is resolved and authorised before the core is invoked; the core
//! trusts the triple completely and only uses it for restaurant scoping,
//! audit attribution and the superadmin status bypass.

use common::{ActorId, RestaurantId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Staff,
    Admin,
    Owner,
    SuperAdmin,
}

impl ActorRole {
    /// Superadmins may edit or cancel orders that are no longer mutable.
    pub fn bypasses_status_check(&self) -> bool {
        matches!(self, ActorRole::SuperAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Staff => "staff",
            ActorRole::Admin => "admin",
            ActorRole::Owner => "owner",
            ActorRole::SuperAdmin => "superadmin",
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "staff" => Ok(ActorRole::Staff),
            "admin" => Ok(ActorRole::Admin),
            "owner" => Ok(ActorRole::Owner),
            "superadmin" => Ok(ActorRole::SuperAdmin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Who is acting, and on which restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationContext {
    pub restaurant_id: RestaurantId,
    pub actor_id: ActorId,
    pub role: ActorRole,
}

impl MutationContext {
    pub fn new(restaurant_id: RestaurantId, actor_id: ActorId, role: ActorRole) -> Self {
        Self {
            restaurant_id,
            actor_id,
            role,
        }
    }
}
