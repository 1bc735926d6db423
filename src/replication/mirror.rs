//! Client-side replica of the match state
//!
//! Consumes the server's message stream in order. Entities the local
//! session owns are simulated locally and pushed back to the server every
//! fixed tick; everything else is mirrored and eased toward the latest
//! authoritative transform by a [`ReconciliationBuffer`].

use std::collections::BTreeMap;

use crate::game::entity::{EntityId, EntityKind, EntitySnapshot, FieldUpdate, FieldValue, SizeTier, Transform};
use crate::game::map_grid::TileGrid;
use crate::lobby::phase::{FinishReason, GamePhase};
use crate::lobby::session::SessionId;
use crate::net::protocol::{Action, RequestKind, ServerMessage};
use crate::replication::reconciliation::{ReconciliationBuffer, SmoothingConfig};
use crate::replication::value::MirroredValue;

/// Mirror of one replicated entity
#[derive(Debug)]
pub struct ReplicaEntity {
    pub kind: EntityKind,
    pub owner: Option<SessionId>,
    pub transform: MirroredValue<Transform>,
    pub size_tier: Option<MirroredValue<SizeTier>>,
    pub mounted_by: Option<MirroredValue<Option<SessionId>>>,
    buffer: ReconciliationBuffer,
    /// Locally simulated pose, authoritative while we own the entity
    local: Transform,
}

impl ReplicaEntity {
    fn from_snapshot(snapshot: &EntitySnapshot) -> Self {
        let pose = snapshot.transform().unwrap_or_default();
        let mut entity = Self {
            kind: snapshot.kind,
            owner: snapshot.owner,
            transform: MirroredValue::new(pose),
            size_tier: None,
            mounted_by: None,
            buffer: ReconciliationBuffer::new(pose, SmoothingConfig::for_kind(snapshot.kind)),
            local: pose,
        };
        for field in &snapshot.fields {
            match field.value {
                FieldValue::Transform(t) => entity.transform = MirroredValue::with_seq(t, field.seq),
                FieldValue::SizeTier(tier) => {
                    entity.size_tier = Some(MirroredValue::with_seq(tier, field.seq));
                }
                FieldValue::MountedBy(rider) => {
                    entity.mounted_by = Some(MirroredValue::with_seq(rider, field.seq));
                }
            }
        }
        entity
    }
}

#[derive(Debug)]
pub struct ClientReplica {
    session: Option<SessionId>,
    phase: MirroredValue<GamePhase>,
    entities: BTreeMap<EntityId, ReplicaEntity>,
    map: Option<TileGrid>,
    game_over: Option<FinishReason>,
}

impl ClientReplica {
    pub fn new() -> Self {
        Self {
            session: None,
            phase: MirroredValue::new(GamePhase::WaitingToStart),
            entities: BTreeMap::new(),
            map: None,
            game_over: None,
        }
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn phase(&self) -> GamePhase {
        *self.phase.get()
    }

    pub fn entity(&self, id: EntityId) -> Option<&ReplicaEntity> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn map(&self) -> Option<&TileGrid> {
        self.map.as_ref()
    }

    pub fn game_over(&self) -> Option<FinishReason> {
        self.game_over
    }

    fn is_local_owner(&self, owner: Option<SessionId>) -> bool {
        owner.is_some() && owner == self.session
    }

    pub fn owns(&self, id: EntityId) -> bool {
        self.entities
            .get(&id)
            .is_some_and(|e| self.is_local_owner(e.owner))
    }

    /// Apply one server message, in stream order
    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::JoinAccepted { session, .. } => self.session = Some(*session),
            ServerMessage::Snapshot(snapshot) => {
                self.phase.apply(snapshot.phase_seq, snapshot.phase);
                self.entities = snapshot
                    .entities
                    .iter()
                    .map(|e| (e.id, ReplicaEntity::from_snapshot(e)))
                    .collect();
                self.map = snapshot.map.clone();
            }
            ServerMessage::Field(update) => self.apply_field(update),
            ServerMessage::OwnerChanged { entity, owner, .. } => self.apply_owner(*entity, *owner),
            ServerMessage::EntitySpawned(snapshot) => {
                self.entities.insert(snapshot.id, ReplicaEntity::from_snapshot(snapshot));
            }
            ServerMessage::EntityDespawned { entity } => {
                self.entities.remove(entity);
            }
            ServerMessage::PhaseChange { seq, phase, .. } => {
                self.phase.apply(*seq, *phase);
            }
            ServerMessage::MapReady(grid) => self.map = Some(grid.clone()),
            ServerMessage::GameOver { reason } => self.game_over = Some(*reason),
            ServerMessage::JoinRejected { .. }
            | ServerMessage::Rejected { .. }
            | ServerMessage::SessionJoined { .. }
            | ServerMessage::SessionLeft { .. }
            | ServerMessage::Pong { .. } => {}
        }
    }

    fn apply_field(&mut self, update: &FieldUpdate) {
        let local_session = self.session;
        let Some(entity) = self.entities.get_mut(&update.entity) else {
            return;
        };
        let locally_owned = entity.owner.is_some() && entity.owner == local_session;

        match update.value {
            FieldValue::Transform(t) => {
                if entity.transform.apply(update.seq, t) && !locally_owned {
                    entity.buffer.set_target(t);
                }
            }
            FieldValue::SizeTier(tier) => {
                if let Some(mirror) = entity.size_tier.as_mut() {
                    mirror.apply(update.seq, tier);
                }
            }
            FieldValue::MountedBy(rider) => {
                if let Some(mirror) = entity.mounted_by.as_mut() {
                    mirror.apply(update.seq, rider);
                }
            }
        }
    }

    fn apply_owner(&mut self, id: EntityId, owner: Option<SessionId>) {
        let local_session = self.session;
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let was_local = entity.owner.is_some() && entity.owner == local_session;
        let is_local = owner.is_some() && owner == local_session;
        entity.owner = owner;

        if is_local && !was_local {
            // Continue simulating from what was on screen
            entity.local = *entity.buffer.rendered();
        } else if was_local && !is_local {
            // Ease from our last simulated pose toward the server's
            entity.buffer = ReconciliationBuffer::new(entity.local, SmoothingConfig::for_kind(entity.kind));
            entity.buffer.set_target(*entity.transform.authoritative());
        }
    }

    /// Feed the local simulation result for an owned entity. Ignored for
    /// entities we do not own.
    pub fn simulate(&mut self, id: EntityId, transform: Transform) -> bool {
        if !self.owns(id) {
            return false;
        }
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.local = transform;
                entity.transform.predict(transform);
                true
            }
            None => false,
        }
    }

    /// Requests to send this physics tick: one transform push per owned
    /// movable entity, while the phase accepts them
    pub fn fixed_tick(&self) -> Vec<RequestKind> {
        let Some(session) = self.session else {
            return Vec::new();
        };
        if !matches!(self.phase(), GamePhase::Countdown | GamePhase::Playing) {
            return Vec::new();
        }
        self.entities
            .iter()
            .filter(|(_, e)| e.owner == Some(session) && !matches!(e.kind, EntityKind::Structure(_)))
            .map(|(id, e)| RequestKind::Entity {
                target: *id,
                claimed_owner: Some(session),
                action: Action::PushTransform(e.local),
            })
            .collect()
    }

    /// Advance smoothing for every entity we do not own
    pub fn render_tick(&mut self, dt: f32) {
        let session = self.session;
        for entity in self.entities.values_mut() {
            let locally_owned = entity.owner.is_some() && entity.owner == session;
            if !locally_owned {
                entity.buffer.advance(dt);
            }
        }
    }

    /// Pose to draw this frame
    pub fn rendered(&self, id: EntityId) -> Option<Transform> {
        let entity = self.entities.get(&id)?;
        if self.is_local_owner(entity.owner) {
            Some(entity.local)
        } else {
            Some(*entity.buffer.rendered())
        }
    }
}

impl Default for ClientReplica {
    fn default() -> Self {
        Self::new()
    }
}
