//! Replicated entity model
//!
//! Every server-authoritative object (avatar, boulder, boat, placed
//! structure) is a [`ReplicatedEntity`]: an id, a kind, an authoritative
//! transform and a few kind-specific replicated fields. Ownership is not
//! stored here; the ownership registry is the single source of truth.

use serde::{Deserialize, Serialize};

use crate::game::constants::placement;
use crate::lobby::session::SessionId;
use crate::replication::value::ReplicatedValue;
use crate::util::quat::Quat;
use crate::util::vec3::Vec3;

/// Unique entity identifier (allocated by the world, never reused)
pub type EntityId = u64;

/// Position + orientation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Identity rotation at `position`
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// NaN/inf guard for client-pushed transforms
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StructureKind {
    Ramp,
    Bridge,
    Platform,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Avatar,
    Boulder,
    Boat,
    Structure(StructureKind),
}

/// What happens to an entity when its owning session is lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Remove the entity from the world
    Despawn,
    /// Keep the entity, clear its owner
    Release,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Avatar => "avatar",
            EntityKind::Boulder => "boulder",
            EntityKind::Boat => "boat",
            EntityKind::Structure(StructureKind::Ramp) => "ramp",
            EntityKind::Structure(StructureKind::Bridge) => "bridge",
            EntityKind::Structure(StructureKind::Platform) => "platform",
        }
    }

    pub fn disconnect_policy(&self) -> DisconnectPolicy {
        match self {
            EntityKind::Avatar => DisconnectPolicy::Despawn,
            EntityKind::Boulder | EntityKind::Boat | EntityKind::Structure(_) => {
                DisconnectPolicy::Release
            }
        }
    }

    /// Kinds a session may place during gameplay
    pub fn is_placeable(&self) -> bool {
        matches!(self, EntityKind::Boat | EntityKind::Structure(_))
    }

    /// Clearance radius used by placement checks. Boulders depend on their
    /// size tier, see [`ReplicatedEntity::radius`].
    pub fn base_radius(&self) -> f32 {
        match self {
            EntityKind::Avatar => placement::AVATAR_RADIUS,
            EntityKind::Boulder => SizeTier::Small.radius(),
            EntityKind::Boat => placement::BOAT_RADIUS,
            EntityKind::Structure(StructureKind::Ramp) => placement::RAMP_RADIUS,
            EntityKind::Structure(StructureKind::Bridge) => placement::BRIDGE_RADIUS,
            EntityKind::Structure(StructureKind::Platform) => placement::PLATFORM_RADIUS,
        }
    }
}

/// Boulder size tier
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SizeTier {
    #[default]
    Small,
    Medium,
    Large,
}

impl SizeTier {
    pub fn radius(&self) -> f32 {
        match self {
            SizeTier::Small => placement::BOULDER_SMALL_RADIUS,
            SizeTier::Medium => placement::BOULDER_MEDIUM_RADIUS,
            SizeTier::Large => placement::BOULDER_LARGE_RADIUS,
        }
    }
}

/// Wire tag for a replicated field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FieldId {
    Transform,
    SizeTier,
    MountedBy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldValue {
    Transform(Transform),
    SizeTier(SizeTier),
    MountedBy(Option<SessionId>),
}

impl FieldValue {
    pub fn field_id(&self) -> FieldId {
        match self {
            FieldValue::Transform(_) => FieldId::Transform,
            FieldValue::SizeTier(_) => FieldId::SizeTier,
            FieldValue::MountedBy(_) => FieldId::MountedBy,
        }
    }
}

/// One replicated field write, tagged with entity, field and sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldUpdate {
    pub entity: EntityId,
    pub field: FieldId,
    pub seq: u64,
    pub value: FieldValue,
}

impl FieldUpdate {
    pub fn new(entity: EntityId, seq: u64, value: FieldValue) -> Self {
        Self {
            entity,
            field: value.field_id(),
            seq,
            value,
        }
    }
}

/// Full state of one entity, sent on spawn and in join snapshots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub owner: Option<SessionId>,
    pub fields: Vec<FieldUpdate>,
}

impl EntitySnapshot {
    pub fn transform(&self) -> Option<Transform> {
        self.fields.iter().find_map(|f| match f.value {
            FieldValue::Transform(t) => Some(t),
            _ => None,
        })
    }
}

/// Kind-specific replicated fields
#[derive(Debug)]
pub enum EntityFields {
    Avatar,
    Boulder { size_tier: ReplicatedValue<SizeTier> },
    Boat { mounted_by: ReplicatedValue<Option<SessionId>> },
    Structure,
}

impl EntityFields {
    fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Avatar => EntityFields::Avatar,
            EntityKind::Boulder => EntityFields::Boulder {
                size_tier: ReplicatedValue::new(SizeTier::default()),
            },
            EntityKind::Boat => EntityFields::Boat {
                mounted_by: ReplicatedValue::new(None),
            },
            EntityKind::Structure(_) => EntityFields::Structure,
        }
    }
}

/// Server-authoritative object
#[derive(Debug)]
pub struct ReplicatedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub transform: ReplicatedValue<Transform>,
    pub fields: EntityFields,
}

impl ReplicatedEntity {
    pub fn new(id: EntityId, kind: EntityKind, transform: Transform) -> Self {
        Self {
            id,
            kind,
            transform: ReplicatedValue::new(transform),
            fields: EntityFields::for_kind(kind),
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.transform.get().position
    }

    /// Current clearance radius
    pub fn radius(&self) -> f32 {
        match &self.fields {
            EntityFields::Boulder { size_tier } => size_tier.get().radius(),
            _ => self.kind.base_radius(),
        }
    }

    pub fn size_tier(&self) -> Option<SizeTier> {
        match &self.fields {
            EntityFields::Boulder { size_tier } => Some(*size_tier.get()),
            _ => None,
        }
    }

    /// `None` for non-boats, `Some(None)` for an empty boat
    pub fn mounted_by(&self) -> Option<Option<SessionId>> {
        match &self.fields {
            EntityFields::Boat { mounted_by } => Some(*mounted_by.get()),
            _ => None,
        }
    }

    /// Set the boulder tier. Returns false for non-boulders or no change.
    pub fn set_size_tier(&mut self, tier: SizeTier) -> bool {
        match &mut self.fields {
            EntityFields::Boulder { size_tier } => size_tier.set(tier),
            _ => false,
        }
    }

    /// Set the boat rider. Returns false for non-boats or no change.
    pub fn set_mounted_by(&mut self, rider: Option<SessionId>) -> bool {
        match &mut self.fields {
            EntityFields::Boat { mounted_by } => mounted_by.set(rider),
            _ => false,
        }
    }

    /// Pending field writes since the last flush
    pub fn drain_dirty(&mut self) -> Vec<FieldUpdate> {
        let mut updates = Vec::new();
        if let Some((seq, t)) = self.transform.take_dirty() {
            updates.push(FieldUpdate::new(self.id, seq, FieldValue::Transform(t)));
        }
        match &mut self.fields {
            EntityFields::Boulder { size_tier } => {
                if let Some((seq, tier)) = size_tier.take_dirty() {
                    updates.push(FieldUpdate::new(self.id, seq, FieldValue::SizeTier(tier)));
                }
            }
            EntityFields::Boat { mounted_by } => {
                if let Some((seq, rider)) = mounted_by.take_dirty() {
                    updates.push(FieldUpdate::new(self.id, seq, FieldValue::MountedBy(rider)));
                }
            }
            EntityFields::Avatar | EntityFields::Structure => {}
        }
        updates
    }

    /// Every field at its current sequence number
    pub fn snapshot(&self, owner: Option<SessionId>) -> EntitySnapshot {
        let mut fields = vec![FieldUpdate::new(
            self.id,
            self.transform.seq(),
            FieldValue::Transform(*self.transform.get()),
        )];
        match &self.fields {
            EntityFields::Boulder { size_tier } => fields.push(FieldUpdate::new(
                self.id,
                size_tier.seq(),
                FieldValue::SizeTier(*size_tier.get()),
            )),
            EntityFields::Boat { mounted_by } => fields.push(FieldUpdate::new(
                self.id,
                mounted_by.seq(),
                FieldValue::MountedBy(*mounted_by.get()),
            )),
            EntityFields::Avatar | EntityFields::Structure => {}
        }
        EntitySnapshot {
            id: self.id,
            kind: self.kind,
            owner,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_policy() {
        assert_eq!(EntityKind::Avatar.disconnect_policy(), DisconnectPolicy::Despawn);
        assert_eq!(EntityKind::Boulder.disconnect_policy(), DisconnectPolicy::Release);
        assert_eq!(EntityKind::Boat.disconnect_policy(), DisconnectPolicy::Release);
        assert_eq!(
            EntityKind::Structure(StructureKind::Bridge).disconnect_policy(),
            DisconnectPolicy::Release
        );
    }

    #[test]
    fn test_boulder_radius_follows_tier() {
        let mut boulder = ReplicatedEntity::new(1, EntityKind::Boulder, Transform::default());
        assert_eq!(boulder.radius(), placement::BOULDER_SMALL_RADIUS);
        assert!(boulder.set_size_tier(SizeTier::Large));
        assert_eq!(boulder.radius(), placement::BOULDER_LARGE_RADIUS);
        assert!(!boulder.set_size_tier(SizeTier::Large));
    }

    #[test]
    fn test_kind_specific_setters() {
        let mut avatar = ReplicatedEntity::new(1, EntityKind::Avatar, Transform::default());
        assert!(!avatar.set_size_tier(SizeTier::Medium));
        assert!(!avatar.set_mounted_by(Some(3)));
        assert_eq!(avatar.size_tier(), None);
        assert_eq!(avatar.mounted_by(), None);

        let mut boat = ReplicatedEntity::new(2, EntityKind::Boat, Transform::default());
        assert_eq!(boat.mounted_by(), Some(None));
        assert!(boat.set_mounted_by(Some(3)));
        assert_eq!(boat.mounted_by(), Some(Some(3)));
    }

    #[test]
    fn test_drain_dirty_collects_each_field_once() {
        let mut boat = ReplicatedEntity::new(7, EntityKind::Boat, Transform::default());
        assert!(boat.drain_dirty().is_empty());

        boat.transform.set(Transform::at(Vec3::new(1.0, 0.0, 0.0)));
        boat.transform.set(Transform::at(Vec3::new(2.0, 0.0, 0.0)));
        boat.set_mounted_by(Some(4));

        let updates = boat.drain_dirty();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].field, FieldId::Transform);
        assert_eq!(updates[0].seq, 2);
        assert_eq!(updates[1].value, FieldValue::MountedBy(Some(4)));
        assert!(boat.drain_dirty().is_empty());
    }

    #[test]
    fn test_snapshot_contains_all_fields() {
        let mut boulder = ReplicatedEntity::new(3, EntityKind::Boulder, Transform::default());
        boulder.set_size_tier(SizeTier::Medium);

        let snap = boulder.snapshot(Some(9));
        assert_eq!(snap.owner, Some(9));
        assert_eq!(snap.fields.len(), 2);
        assert_eq!(snap.fields[1].seq, 1);
        assert_eq!(snap.transform(), Some(Transform::default()));
    }

    #[test]
    fn test_transform_is_finite() {
        assert!(Transform::default().is_finite());
        let bad = Transform::at(Vec3::new(f32::NAN, 0.0, 0.0));
        assert!(!bad.is_finite());
    }
}
