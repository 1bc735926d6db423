//! Placement checks for boats and structures
//!
//! A client previews placement locally, but the preview is only a hint. The
//! server re-runs the overlap test against its own world at apply time, so a
//! spot that was free when the client looked may still be refused.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::entity::{EntityId, EntityKind, Transform};
use crate::game::world::World;
use crate::lobby::session::SessionId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlacementRequest {
    pub kind: EntityKind,
    pub transform: Transform,
    pub requester: SessionId,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("{0:?} cannot be placed")]
    NotPlaceable(EntityKind),

    #[error("placement transform is not finite")]
    InvalidTransform,

    #[error("placement blocked by entity {0}")]
    Blocked(EntityId),
}

impl PlacementRequest {
    pub fn new(kind: EntityKind, transform: Transform, requester: SessionId) -> Self {
        Self {
            kind,
            transform,
            requester,
        }
    }

    /// Check the request against the current world, keeping `margin` extra
    /// clearance around the new footprint
    pub fn check(&self, world: &World, margin: f32) -> Result<(), PlacementError> {
        if !self.kind.is_placeable() {
            return Err(PlacementError::NotPlaceable(self.kind));
        }
        if !self.transform.is_finite() {
            return Err(PlacementError::InvalidTransform);
        }
        match world.first_blocker(self.transform.position, self.kind.base_radius() + margin) {
            Some(blocker) => Err(PlacementError::Blocked(blocker)),
            None => Ok(()),
        }
    }
}
