//! Ownership registry
//!
//! Maps every registered entity to at most one owning session. The registry
//! is only ever touched from the server tick, so concurrent claims for the
//! same entity resolve in arrival order: the first claim wins and later
//! claimants get [`OwnershipError::OwnershipDenied`].

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::game::entity::EntityId;
use crate::lobby::session::SessionId;

/// Ownership failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OwnershipError {
    #[error("Entity {entity} is owned by session {owner}")]
    OwnershipDenied { entity: EntityId, owner: SessionId },
    #[error("Session {session} does not own entity {entity}")]
    NotOwner { entity: EntityId, session: SessionId },
    #[error("Entity {0} is not registered")]
    EntityUnknown(EntityId),
}

/// Emitted whenever an entity's owner changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipEvent {
    pub entity: EntityId,
    pub previous: Option<SessionId>,
    pub owner: Option<SessionId>,
}

type OwnedList = SmallVec<[EntityId; 4]>;

/// Entity to owner table with a per-session reverse index
#[derive(Debug, Default)]
pub struct OwnershipRegistry {
    owners: FxHashMap<EntityId, Option<SessionId>>,
    owned: FxHashMap<SessionId, OwnedList>,
    events: Vec<OwnershipEvent>,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity with no owner (server-held)
    pub fn register(&mut self, entity: EntityId) {
        self.owners.insert(entity, None);
    }

    /// Register an entity already owned by `session` (spawned on its behalf)
    pub fn register_owned(&mut self, entity: EntityId, session: SessionId) {
        self.owners.insert(entity, Some(session));
        self.index_add(session, entity);
        self.events.push(OwnershipEvent {
            entity,
            previous: None,
            owner: Some(session),
        });
    }

    /// Forget an entity (despawned). Returns its last owner.
    pub fn unregister(&mut self, entity: EntityId) -> Option<SessionId> {
        let owner = self.owners.remove(&entity).flatten();
        if let Some(session) = owner {
            self.index_remove(session, entity);
        }
        owner
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.owners.contains_key(&entity)
    }

    /// Current owner. `Err(EntityUnknown)` for unregistered ids.
    pub fn owner_of(&self, entity: EntityId) -> Result<Option<SessionId>, OwnershipError> {
        self.owners
            .get(&entity)
            .copied()
            .ok_or(OwnershipError::EntityUnknown(entity))
    }

    pub fn is_owner(&self, entity: EntityId, session: SessionId) -> bool {
        matches!(self.owners.get(&entity), Some(Some(owner)) if *owner == session)
    }

    /// Entities currently owned by a session
    pub fn owned_by(&self, session: SessionId) -> &[EntityId] {
        self.owned.get(&session).map(|l| l.as_slice()).unwrap_or(&[])
    }

    /// Claim an entity. Succeeds if it is unowned or already ours.
    pub fn request_ownership(
        &mut self,
        entity: EntityId,
        session: SessionId,
    ) -> Result<(), OwnershipError> {
        let slot = self
            .owners
            .get_mut(&entity)
            .ok_or(OwnershipError::EntityUnknown(entity))?;

        let current = *slot;
        match current {
            Some(owner) if owner == session => Ok(()),
            Some(owner) => Err(OwnershipError::OwnershipDenied { entity, owner }),
            None => {
                *slot = Some(session);
                self.index_add(session, entity);
                self.events.push(OwnershipEvent {
                    entity,
                    previous: None,
                    owner: Some(session),
                });
                debug!("Session {} took ownership of entity {}", session, entity);
                Ok(())
            }
        }
    }

    /// Give an entity back to the server. No-op unless `session` owns it.
    /// Returns true if ownership was actually cleared.
    pub fn release_ownership(&mut self, entity: EntityId, session: SessionId) -> bool {
        if self.owners.get(&entity) != Some(&Some(session)) {
            return false;
        }
        self.owners.insert(entity, None);
        self.index_remove(session, entity);
        self.events.push(OwnershipEvent {
            entity,
            previous: Some(session),
            owner: None,
        });
        debug!("Session {} released entity {}", session, entity);
        true
    }

    /// Hand an entity from its current owner to another session
    pub fn transfer_ownership(
        &mut self,
        entity: EntityId,
        from: SessionId,
        to: SessionId,
    ) -> Result<(), OwnershipError> {
        let slot = self
            .owners
            .get_mut(&entity)
            .ok_or(OwnershipError::EntityUnknown(entity))?;

        if *slot != Some(from) {
            return Err(OwnershipError::NotOwner {
                entity,
                session: from,
            });
        }
        if from == to {
            return Ok(());
        }
        *slot = Some(to);

        self.index_remove(from, entity);
        self.index_add(to, entity);
        self.events.push(OwnershipEvent {
            entity,
            previous: Some(from),
            owner: Some(to),
        });
        debug!("Entity {} transferred from session {} to {}", entity, from, to);
        Ok(())
    }

    /// Release everything a session holds (disconnect). Returns the entities
    /// that were released.
    pub fn release_all(&mut self, session: SessionId) -> Vec<EntityId> {
        let entities: Vec<EntityId> = self.owned_by(session).to_vec();
        for entity in &entities {
            self.release_ownership(*entity, session);
        }
        self.owned.remove(&session);
        entities
    }

    /// Ownership changes since the last drain, in the order they happened
    pub fn drain_events(&mut self) -> Vec<OwnershipEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    fn index_add(&mut self, session: SessionId, entity: EntityId) {
        let list = self.owned.entry(session).or_default();
        if !list.contains(&entity) {
            list.push(entity);
        }
    }

    fn index_remove(&mut self, session: SessionId, entity: EntityId) {
        if let Some(list) = self.owned.get_mut(&session) {
            list.retain(|e| *e != entity);
            if list.is_empty() {
                self.owned.remove(&session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SessionId = 1;
    const B: SessionId = 2;

    #[test]
    fn test_request_unowned() {
        let mut registry = OwnershipRegistry::new();
        registry.register(10);

        registry.request_ownership(10, A).unwrap();

        assert_eq!(registry.owner_of(10), Ok(Some(A)));
        assert_eq!(registry.owned_by(A), &[10]);
    }

    #[test]
    fn test_contested_request_denied() {
        let mut registry = OwnershipRegistry::new();
        registry.register(10);

        // Both claims arrive in the same tick; A's arrived first
        let first = registry.request_ownership(10, A);
        let second = registry.request_ownership(10, B);

        assert!(first.is_ok());
        assert_eq!(
            second,
            Err(OwnershipError::OwnershipDenied { entity: 10, owner: A })
        );
        assert_eq!(registry.owner_of(10), Ok(Some(A)));
    }

    #[test]
    fn test_request_is_idempotent_for_owner() {
        let mut registry = OwnershipRegistry::new();
        registry.register_owned(10, A);
        registry.drain_events();

        assert!(registry.request_ownership(10, A).is_ok());
        assert!(registry.drain_events().is_empty());
    }

    #[test]
    fn test_release_by_non_owner_is_noop() {
        let mut registry = OwnershipRegistry::new();
        registry.register_owned(10, A);

        assert!(!registry.release_ownership(10, B));
        assert_eq!(registry.owner_of(10), Ok(Some(A)));

        assert!(registry.release_ownership(10, A));
        assert_eq!(registry.owner_of(10), Ok(None));
        assert!(registry.owned_by(A).is_empty());
    }

    #[test]
    fn test_transfer_requires_current_owner() {
        let mut registry = OwnershipRegistry::new();
        registry.register_owned(10, A);

        assert_eq!(
            registry.transfer_ownership(10, B, A),
            Err(OwnershipError::NotOwner { entity: 10, session: B })
        );

        registry.transfer_ownership(10, A, B).unwrap();
        assert_eq!(registry.owner_of(10), Ok(Some(B)));
        assert!(registry.owned_by(A).is_empty());
        assert_eq!(registry.owned_by(B), &[10]);
    }

    #[test]
    fn test_unknown_entity() {
        let mut registry = OwnershipRegistry::new();
        assert_eq!(
            registry.request_ownership(99, A),
            Err(OwnershipError::EntityUnknown(99))
        );
        assert_eq!(registry.owner_of(99), Err(OwnershipError::EntityUnknown(99)));
    }

    #[test]
    fn test_release_all_on_disconnect() {
        let mut registry = OwnershipRegistry::new();
        registry.register_owned(1, A);
        registry.register_owned(2, A);
        registry.register_owned(3, B);
        registry.drain_events();

        let released = registry.release_all(A);

        assert_eq!(released, vec![1, 2]);
        assert_eq!(registry.owner_of(1), Ok(None));
        assert_eq!(registry.owner_of(3), Ok(Some(B)));
        let events = registry.drain_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.previous == Some(A) && e.owner.is_none()));
    }

    #[test]
    fn test_unregister_cleans_index() {
        let mut registry = OwnershipRegistry::new();
        registry.register_owned(1, A);

        assert_eq!(registry.unregister(1), Some(A));
        assert!(!registry.contains(1));
        assert!(registry.owned_by(A).is_empty());
    }
}
