//! Caller identity extracted from gateway headers.
//!
//! Authentication happens upstream; the gateway forwards the verified
//! restaurant, actor and role as headers and this layer trusts them.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{ActorId, RestaurantId};
use domain::{ActorRole, MutationContext};
use uuid::Uuid;

use crate::error::ApiError;

pub const RESTAURANT_HEADER: &str = "x-restaurant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ROLE_HEADER: &str = "x-actor-role";

/// The resolved `(restaurant, actor, role)` triple of a request.
#[derive(Debug, Clone, Copy)]
pub struct Principal(pub MutationContext);

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let restaurant_id = RestaurantId::from_uuid(header_uuid(parts, RESTAURANT_HEADER)?);
        let actor_id = ActorId::from_uuid(header_uuid(parts, ACTOR_HEADER)?);
        let role = header(parts, ROLE_HEADER)?
            .parse::<ActorRole>()
            .map_err(ApiError::Unauthorized)?;

        Ok(Principal(MutationContext::new(restaurant_id, actor_id, role)))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| ApiError::Unauthorized(format!("{name} header is not valid text")))
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(header(parts, name)?)
        .map_err(|e| ApiError::Unauthorized(format!("{name} header is not a UUID: {e}")))
}
