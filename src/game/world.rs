//! Entity arena for one match

use hashbrown::HashMap;

use crate::game::entity::{EntityId, EntityKind, EntitySnapshot, FieldUpdate, ReplicatedEntity, Transform};
use crate::replication::ownership::OwnershipRegistry;
use crate::util::vec3::Vec3;

/// Creates and destroys entities on behalf of the match server
pub trait Spawner {
    fn spawn(&mut self, kind: EntityKind, transform: Transform) -> EntityId;
    fn despawn(&mut self, id: EntityId) -> Option<ReplicatedEntity>;
}

/// All live entities, keyed by id
#[derive(Debug)]
pub struct World {
    entities: HashMap<EntityId, ReplicatedEntity>,
    next_id: EntityId,
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
        }
    }

    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&ReplicatedEntity> {
        self.entities.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut ReplicatedEntity> {
        self.entities.get_mut(&id)
    }

    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicatedEntity> {
        self.entities.values()
    }

    /// Entity ids in ascending order (stable broadcast order)
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// First entity whose footprint overlaps a circle at `position` on the
    /// ground plane
    pub fn first_blocker(&self, position: Vec3, radius: f32) -> Option<EntityId> {
        self.sorted_ids().into_iter().find(|id| {
            self.entities.get(id).is_some_and(|e| {
                e.position().planar_distance_to(position) < e.radius() + radius
            })
        })
    }

    #[inline]
    pub fn is_clear(&self, position: Vec3, radius: f32) -> bool {
        self.first_blocker(position, radius).is_none()
    }

    /// Pending field writes across all entities, in id order
    pub fn drain_dirty(&mut self) -> Vec<FieldUpdate> {
        let mut updates = Vec::new();
        for id in self.sorted_ids() {
            if let Some(entity) = self.entities.get_mut(&id) {
                updates.extend(entity.drain_dirty());
            }
        }
        updates
    }

    /// Full world state for a joining session
    pub fn snapshot(&self, registry: &OwnershipRegistry) -> Vec<EntitySnapshot> {
        self.sorted_ids()
            .into_iter()
            .filter_map(|id| {
                let entity = self.entities.get(&id)?;
                let owner = registry.owner_of(id).ok().flatten();
                Some(entity.snapshot(owner))
            })
            .collect()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Spawner for World {
    fn spawn(&mut self, kind: EntityKind, transform: Transform) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        self.entities.insert(id, ReplicatedEntity::new(id, kind, transform));
        id
    }

    fn despawn(&mut self, id: EntityId) -> Option<ReplicatedEntity> {
        self.entities.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::StructureKind;

    #[test]
    fn test_spawn_allocates_unique_ids() {
        let mut world = World::new();
        let a = world.spawn(EntityKind::Avatar, Transform::default());
        let b = world.spawn(EntityKind::Boulder, Transform::default());
        assert_ne!(a, b);
        assert_eq!(world.len(), 2);

        world.despawn(a);
        let c = world.spawn(EntityKind::Boat, Transform::default());
        assert_ne!(c, a);
        assert!(!world.contains(a));
    }

    #[test]
    fn test_clearance() {
        let mut world = World::new();
        let boat = world.spawn(EntityKind::Boat, Transform::at(Vec3::new(0.0, 0.0, 0.0)));

        // Boat radius 2 + ramp radius 1.5
        assert_eq!(world.first_blocker(Vec3::new(3.0, 0.0, 0.0), 1.5), Some(boat));
        assert!(world.is_clear(Vec3::new(4.0, 0.0, 0.0), 1.5));
        // Height does not matter, only the ground footprint
        assert_eq!(world.first_blocker(Vec3::new(0.0, 10.0, 0.0), 0.1), Some(boat));
    }

    #[test]
    fn test_snapshot_includes_owner() {
        let mut world = World::new();
        let mut registry = OwnershipRegistry::new();
        let owned = world.spawn(EntityKind::Boulder, Transform::default());
        let free = world.spawn(EntityKind::Structure(StructureKind::Ramp), Transform::default());
        registry.register_owned(owned, 5);
        registry.register(free);

        let snap = world.snapshot(&registry);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].owner, Some(5));
        assert_eq!(snap[1].owner, None);
    }

    #[test]
    fn test_drain_dirty_in_id_order() {
        let mut world = World::new();
        let a = world.spawn(EntityKind::Avatar, Transform::default());
        let b = world.spawn(EntityKind::Avatar, Transform::default());
        world.get_mut(b).unwrap().transform.set(Transform::at(Vec3::new(1.0, 0.0, 0.0)));
        world.get_mut(a).unwrap().transform.set(Transform::at(Vec3::new(2.0, 0.0, 0.0)));

        let updates = world.drain_dirty();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].entity, a);
        assert_eq!(updates[1].entity, b);
        assert!(world.drain_dirty().is_empty());
    }
}
