//! Request validation against current server state
//!
//! Every client request passes the same ordered checks before the match
//! server applies it. The first failing check decides the `Rejection`.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::game::entity::{EntityId, EntityKind, Transform};
use crate::game::placement::{PlacementError, PlacementRequest};
use crate::game::request_queue::Request;
use crate::game::world::World;
use crate::lobby::coordinator::{LobbyError, SessionLifecycleCoordinator};
use crate::lobby::phase::GamePhase;
use crate::lobby::session::{sanitize_prompt, SessionId};
use crate::net::protocol::{Action, RequestKind};
use crate::replication::ownership::{OwnershipError, OwnershipRegistry};

/// Why a request was refused. Rejections are terminal: the request is
/// dropped, nothing changes and nothing is broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Rejection {
    #[error("Sender does not own entity {entity} (owner {owner:?})")]
    SenderNotOwner {
        entity: EntityId,
        owner: Option<SessionId>,
    },
    #[error("Unknown entity {0}")]
    EntityUnknown(EntityId),
    #[error("Request not permitted during {0:?}")]
    PhaseNotPermitted(GamePhase),
    #[error("Entity {0} is owned by another session")]
    OwnershipDenied(EntityId),
    #[error("Not the owner of entity {0}")]
    NotOwner(EntityId),
    #[error("Session {0} is no longer connected")]
    SessionLost(SessionId),
    #[error("Placement blocked by entity {0}")]
    PlacementBlocked(EntityId),
    #[error("NaN or Infinity in transform")]
    InvalidTransform,
    #[error("Action does not apply to {0:?}")]
    WrongEntityKind(EntityKind),
    #[error("Malformed request payload")]
    InvalidPayload,
    #[error("Match is not accepting sessions")]
    MatchClosed,
}

impl From<OwnershipError> for Rejection {
    fn from(err: OwnershipError) -> Self {
        match err {
            OwnershipError::OwnershipDenied { entity, .. } => Rejection::OwnershipDenied(entity),
            OwnershipError::NotOwner { entity, .. } => Rejection::NotOwner(entity),
            OwnershipError::EntityUnknown(entity) => Rejection::EntityUnknown(entity),
        }
    }
}

impl From<PlacementError> for Rejection {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::NotPlaceable(kind) => Rejection::WrongEntityKind(kind),
            PlacementError::InvalidTransform => Rejection::InvalidTransform,
            PlacementError::Blocked(blocker) => Rejection::PlacementBlocked(blocker),
        }
    }
}

impl From<LobbyError> for Rejection {
    fn from(err: LobbyError) -> Self {
        match err {
            LobbyError::WrongPhase(phase) => Rejection::PhaseNotPermitted(phase),
            LobbyError::SessionUnknown(session) => Rejection::SessionLost(session),
            LobbyError::InvalidName | LobbyError::InvalidPrompt => Rejection::InvalidPayload,
            LobbyError::MatchInProgress | LobbyError::MatchFull => Rejection::MatchClosed,
        }
    }
}

/// Request categories the phase policy is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    PushTransform,
    Resize,
    Mount,
    Dismount,
    HandOff,
    ClaimOwnership,
    ReleaseOwnership,
    Despawn,
    Place,
    SignalJoined,
    SignalCinematicComplete,
    SubmitPrompt,
    DeclareFinished,
    Customize,
}

impl RequestClass {
    pub fn of(kind: &RequestKind) -> Self {
        match kind {
            RequestKind::Entity { action, .. } => match action {
                Action::PushTransform(_) => RequestClass::PushTransform,
                Action::Resize(_) => RequestClass::Resize,
                Action::Mount => RequestClass::Mount,
                Action::Dismount => RequestClass::Dismount,
                Action::HandOff { .. } => RequestClass::HandOff,
                Action::ClaimOwnership => RequestClass::ClaimOwnership,
                Action::ReleaseOwnership => RequestClass::ReleaseOwnership,
                Action::Despawn => RequestClass::Despawn,
            },
            RequestKind::Place { .. } => RequestClass::Place,
            RequestKind::SignalJoined => RequestClass::SignalJoined,
            RequestKind::SignalCinematicComplete => RequestClass::SignalCinematicComplete,
            RequestKind::SubmitPrompt { .. } => RequestClass::SubmitPrompt,
            RequestKind::DeclareFinished => RequestClass::DeclareFinished,
            RequestKind::Customize(_) => RequestClass::Customize,
        }
    }
}

const ALL_PHASES: [GamePhase; 8] = [
    GamePhase::WaitingToStart,
    GamePhase::FirstPrompt,
    GamePhase::SecondPrompt,
    GamePhase::PromptGeneration,
    GamePhase::Cinematic,
    GamePhase::Countdown,
    GamePhase::Playing,
    GamePhase::Finished,
];

#[inline]
fn phase_bit(phase: GamePhase) -> u8 {
    1 << phase.index()
}

fn mask(phases: &[GamePhase]) -> u8 {
    phases.iter().fold(0, |acc, p| acc | phase_bit(*p))
}

/// Which phases accept which request classes
#[derive(Debug, Clone)]
pub struct PhasePolicy {
    allowed: HashMap<RequestClass, u8>,
}

impl PhasePolicy {
    /// Replace the phases that accept `class`
    pub fn allow(&mut self, class: RequestClass, phases: &[GamePhase]) {
        self.allowed.insert(class, mask(phases));
    }

    pub fn allows(&self, class: RequestClass, phase: GamePhase) -> bool {
        self.allowed
            .get(&class)
            .is_some_and(|bits| bits & phase_bit(phase) != 0)
    }
}

impl Default for PhasePolicy {
    fn default() -> Self {
        use GamePhase::*;

        let before_playing: Vec<GamePhase> =
            ALL_PHASES.iter().copied().filter(|p| *p < Playing).collect();

        let mut policy = Self {
            allowed: HashMap::new(),
        };
        policy.allow(RequestClass::PushTransform, &[Countdown, Playing]);
        for class in [
            RequestClass::Resize,
            RequestClass::Mount,
            RequestClass::Dismount,
            RequestClass::HandOff,
            RequestClass::ClaimOwnership,
            RequestClass::ReleaseOwnership,
            RequestClass::Despawn,
            RequestClass::Place,
        ] {
            policy.allow(class, &[Playing]);
        }
        policy.allow(RequestClass::SignalJoined, &ALL_PHASES);
        policy.allow(RequestClass::SignalCinematicComplete, &[Cinematic]);
        policy.allow(RequestClass::SubmitPrompt, &[FirstPrompt, SecondPrompt]);
        // Finished stays open so a late duplicate is an accepted no-op
        policy.allow(RequestClass::DeclareFinished, &[Playing, Finished]);
        policy.allow(RequestClass::Customize, &before_playing);
        policy
    }
}

/// Server state a request is validated against. Built at apply time, never
/// at receive time.
pub struct ValidationContext<'a> {
    pub coordinator: &'a SessionLifecycleCoordinator,
    pub registry: &'a OwnershipRegistry,
    pub world: &'a World,
}

pub struct AuthorityValidator {
    policy: PhasePolicy,
    placement_margin: f32,
}

impl AuthorityValidator {
    pub fn new(policy: PhasePolicy, placement_margin: f32) -> Self {
        Self {
            policy,
            placement_margin,
        }
    }

    pub fn policy(&self) -> &PhasePolicy {
        &self.policy
    }

    /// Check a request against current server state
    pub fn validate(&self, request: &Request, ctx: &ValidationContext<'_>) -> Result<(), Rejection> {
        let sender = request.sender;
        if !ctx.coordinator.is_connected(sender) {
            return Err(Rejection::SessionLost(sender));
        }

        let phase = ctx.coordinator.phase();
        if !self.policy.allows(RequestClass::of(&request.kind), phase) {
            return Err(Rejection::PhaseNotPermitted(phase));
        }

        match &request.kind {
            RequestKind::Entity {
                target,
                claimed_owner,
                action,
            } => self.validate_entity_action(sender, *target, *claimed_owner, action, ctx),
            RequestKind::Place { kind, transform } => {
                PlacementRequest::new(*kind, *transform, sender)
                    .check(ctx.world, self.placement_margin)
                    .map_err(Rejection::from)
            }
            RequestKind::SubmitPrompt { text } => match sanitize_prompt(text) {
                Some(_) => Ok(()),
                None => Err(Rejection::InvalidPayload),
            },
            RequestKind::SignalJoined
            | RequestKind::SignalCinematicComplete
            | RequestKind::DeclareFinished
            | RequestKind::Customize(_) => Ok(()),
        }
    }

    fn validate_entity_action(
        &self,
        sender: SessionId,
        target: EntityId,
        claimed_owner: Option<SessionId>,
        action: &Action,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), Rejection> {
        let entity = ctx.world.get(target).ok_or(Rejection::EntityUnknown(target))?;
        let owner = ctx.registry.owner_of(target)?;

        check_kind(action, entity.kind)?;

        match action {
            Action::PushTransform(_) | Action::Resize(_) | Action::HandOff { .. } | Action::Despawn => {
                if owner != Some(sender) || claimed_owner != owner {
                    return Err(Rejection::SenderNotOwner { entity: target, owner });
                }
            }
            Action::ClaimOwnership | Action::Mount => {
                if owner.is_some_and(|o| o != sender) {
                    return Err(Rejection::OwnershipDenied(target));
                }
                if let Some(Some(rider)) = entity.mounted_by() {
                    if rider != sender {
                        return Err(Rejection::OwnershipDenied(target));
                    }
                }
            }
            Action::Dismount => {
                if entity.mounted_by() != Some(Some(sender)) {
                    return Err(Rejection::NotOwner(target));
                }
            }
            // No-op for non-owners, never rejected
            Action::ReleaseOwnership => {}
        }

        match action {
            Action::PushTransform(transform) => check_transform(transform),
            Action::HandOff { to } if !ctx.coordinator.is_connected(*to) => {
                Err(Rejection::SessionLost(*to))
            }
            _ => Ok(()),
        }
    }
}

impl Default for AuthorityValidator {
    fn default() -> Self {
        Self::new(PhasePolicy::default(), 0.0)
    }
}

fn check_kind(action: &Action, kind: EntityKind) -> Result<(), Rejection> {
    let fits = match action {
        Action::PushTransform(_) => !matches!(kind, EntityKind::Structure(_)),
        Action::Resize(_) => kind == EntityKind::Boulder,
        Action::Mount | Action::Dismount => kind == EntityKind::Boat,
        Action::HandOff { .. } | Action::ClaimOwnership | Action::ReleaseOwnership => {
            kind != EntityKind::Avatar
        }
        Action::Despawn => kind.is_placeable(),
    };
    if fits {
        Ok(())
    } else {
        Err(Rejection::WrongEntityKind(kind))
    }
}

fn check_transform(transform: &Transform) -> Result<(), Rejection> {
    if transform.is_finite() {
        Ok(())
    } else {
        Err(Rejection::InvalidTransform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{SizeTier, StructureKind};
    use crate::game::world::Spawner;
    use crate::lobby::coordinator::PhaseTimings;
    use crate::util::vec3::Vec3;

    struct Fixture {
        coordinator: SessionLifecycleCoordinator,
        registry: OwnershipRegistry,
        world: World,
        a: SessionId,
        b: SessionId,
    }

    impl Fixture {
        fn new(phase: GamePhase) -> Self {
            let mut coordinator = SessionLifecycleCoordinator::new(PhaseTimings::default(), 4, 1);
            let a = coordinator.connect("A").unwrap();
            let b = coordinator.connect("B").unwrap();
            coordinator.force_phase(phase);
            Self {
                coordinator,
                registry: OwnershipRegistry::new(),
                world: World::new(),
                a,
                b,
            }
        }

        fn spawn(&mut self, kind: EntityKind, x: f32, owner: Option<SessionId>) -> EntityId {
            let id = self.world.spawn(kind, Transform::at(Vec3::new(x, 0.0, 0.0)));
            match owner {
                Some(session) => self.registry.register_owned(id, session),
                None => self.registry.register(id),
            }
            id
        }

        fn validate(&self, sender: SessionId, kind: RequestKind) -> Result<(), Rejection> {
            let ctx = ValidationContext {
                coordinator: &self.coordinator,
                registry: &self.registry,
                world: &self.world,
            };
            AuthorityValidator::default().validate(&Request::new(sender, kind), &ctx)
        }
    }

    fn entity(target: EntityId, claimed_owner: Option<SessionId>, action: Action) -> RequestKind {
        RequestKind::Entity {
            target,
            claimed_owner,
            action,
        }
    }

    fn push(x: f32) -> Action {
        Action::PushTransform(Transform::at(Vec3::new(x, 0.0, 0.0)))
    }

    #[test]
    fn test_owner_push_accepted() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boulder = f.spawn(EntityKind::Boulder, 0.0, Some(f.a));
        assert_eq!(f.validate(f.a, entity(boulder, Some(f.a), push(1.0))), Ok(()));
    }

    #[test]
    fn test_non_owner_push_rejected() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boulder = f.spawn(EntityKind::Boulder, 0.0, Some(f.a));
        assert_eq!(
            f.validate(f.b, entity(boulder, Some(f.b), push(1.0))),
            Err(Rejection::SenderNotOwner {
                entity: boulder,
                owner: Some(f.a)
            })
        );
    }

    #[test]
    fn test_stale_claimed_owner_rejected() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boat = f.spawn(EntityKind::Boat, 0.0, Some(f.a));
        // Client still believes it is unowned
        assert!(matches!(
            f.validate(f.a, entity(boat, None, push(1.0))),
            Err(Rejection::SenderNotOwner { .. })
        ));
    }

    #[test]
    fn test_disconnected_sender() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boulder = f.spawn(EntityKind::Boulder, 0.0, Some(f.a));
        f.coordinator.disconnect(f.a);
        assert_eq!(
            f.validate(f.a, entity(boulder, Some(f.a), push(1.0))),
            Err(Rejection::SessionLost(f.a))
        );
    }

    #[test]
    fn test_phase_gating() {
        let mut f = Fixture::new(GamePhase::Cinematic);
        let boulder = f.spawn(EntityKind::Boulder, 0.0, Some(f.a));
        assert_eq!(
            f.validate(f.a, entity(boulder, Some(f.a), push(1.0))),
            Err(Rejection::PhaseNotPermitted(GamePhase::Cinematic))
        );
        assert_eq!(
            f.validate(f.a, RequestKind::SubmitPrompt { text: "x".into() }),
            Err(Rejection::PhaseNotPermitted(GamePhase::Cinematic))
        );
        assert_eq!(f.validate(f.a, RequestKind::SignalCinematicComplete), Ok(()));
        assert_eq!(f.validate(f.a, RequestKind::SignalJoined), Ok(()));
    }

    #[test]
    fn test_push_allowed_in_countdown() {
        let mut f = Fixture::new(GamePhase::Countdown);
        let avatar = f.spawn(EntityKind::Avatar, 0.0, Some(f.a));
        assert_eq!(f.validate(f.a, entity(avatar, Some(f.a), push(1.0))), Ok(()));
    }

    #[test]
    fn test_unknown_entity() {
        let f = Fixture::new(GamePhase::Playing);
        assert_eq!(
            f.validate(f.a, entity(99, Some(f.a), push(1.0))),
            Err(Rejection::EntityUnknown(99))
        );
    }

    #[test]
    fn test_wrong_kind() {
        let mut f = Fixture::new(GamePhase::Playing);
        let avatar = f.spawn(EntityKind::Avatar, 0.0, Some(f.a));
        assert_eq!(
            f.validate(f.a, entity(avatar, Some(f.a), Action::Resize(SizeTier::Large))),
            Err(Rejection::WrongEntityKind(EntityKind::Avatar))
        );
        assert_eq!(
            f.validate(f.a, entity(avatar, Some(f.a), Action::HandOff { to: f.b })),
            Err(Rejection::WrongEntityKind(EntityKind::Avatar))
        );
    }

    #[test]
    fn test_nan_transform() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boat = f.spawn(EntityKind::Boat, 0.0, Some(f.a));
        assert_eq!(
            f.validate(f.a, entity(boat, Some(f.a), push(f32::NAN))),
            Err(Rejection::InvalidTransform)
        );
    }

    #[test]
    fn test_claim_owned_by_other_denied() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boulder = f.spawn(EntityKind::Boulder, 0.0, Some(f.a));
        let free = f.spawn(EntityKind::Boulder, 10.0, None);
        assert_eq!(
            f.validate(f.b, entity(boulder, None, Action::ClaimOwnership)),
            Err(Rejection::OwnershipDenied(boulder))
        );
        assert_eq!(f.validate(f.b, entity(free, None, Action::ClaimOwnership)), Ok(()));
    }

    #[test]
    fn test_mount_and_dismount() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boat = f.spawn(EntityKind::Boat, 0.0, None);
        assert_eq!(f.validate(f.a, entity(boat, None, Action::Mount)), Ok(()));
        assert_eq!(
            f.validate(f.a, entity(boat, None, Action::Dismount)),
            Err(Rejection::NotOwner(boat))
        );

        f.world.get_mut(boat).unwrap().set_mounted_by(Some(f.a));
        f.registry.request_ownership(boat, f.a).unwrap();
        assert_eq!(f.validate(f.a, entity(boat, Some(f.a), Action::Dismount)), Ok(()));
        assert_eq!(
            f.validate(f.b, entity(boat, Some(f.a), Action::Mount)),
            Err(Rejection::OwnershipDenied(boat))
        );
    }

    #[test]
    fn test_hand_off_to_missing_session() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boulder = f.spawn(EntityKind::Boulder, 0.0, Some(f.a));
        assert_eq!(
            f.validate(f.a, entity(boulder, Some(f.a), Action::HandOff { to: 77 })),
            Err(Rejection::SessionLost(77))
        );
        assert_eq!(
            f.validate(f.a, entity(boulder, Some(f.a), Action::HandOff { to: f.b })),
            Ok(())
        );
    }

    #[test]
    fn test_release_by_non_owner_is_not_rejected() {
        let mut f = Fixture::new(GamePhase::Playing);
        let boulder = f.spawn(EntityKind::Boulder, 0.0, Some(f.a));
        assert_eq!(
            f.validate(f.b, entity(boulder, None, Action::ReleaseOwnership)),
            Ok(())
        );
    }

    #[test]
    fn test_placement_recheck() {
        let mut f = Fixture::new(GamePhase::Playing);
        let ramp = RequestKind::Place {
            kind: EntityKind::Structure(StructureKind::Ramp),
            transform: Transform::at(Vec3::new(0.0, 0.0, 0.0)),
        };
        assert_eq!(f.validate(f.a, ramp.clone()), Ok(()));

        let blocker = f.spawn(EntityKind::Boat, 1.0, Some(f.b));
        assert_eq!(f.validate(f.a, ramp), Err(Rejection::PlacementBlocked(blocker)));

        let boulder = RequestKind::Place {
            kind: EntityKind::Boulder,
            transform: Transform::at(Vec3::new(50.0, 0.0, 0.0)),
        };
        assert_eq!(
            f.validate(f.a, boulder),
            Err(Rejection::WrongEntityKind(EntityKind::Boulder))
        );
    }

    #[test]
    fn test_empty_prompt() {
        let f = Fixture::new(GamePhase::FirstPrompt);
        assert_eq!(
            f.validate(f.a, RequestKind::SubmitPrompt { text: "  ".into() }),
            Err(Rejection::InvalidPayload)
        );
        assert_eq!(
            f.validate(f.a, RequestKind::SubmitPrompt { text: "volcano".into() }),
            Ok(())
        );
    }

    #[test]
    fn test_declare_finished_policy() {
        let f = Fixture::new(GamePhase::Finished);
        assert_eq!(f.validate(f.a, RequestKind::DeclareFinished), Ok(()));
        let f = Fixture::new(GamePhase::Countdown);
        assert_eq!(
            f.validate(f.a, RequestKind::DeclareFinished),
            Err(Rejection::PhaseNotPermitted(GamePhase::Countdown))
        );
    }

    #[test]
    fn test_custom_policy() {
        let mut policy = PhasePolicy::default();
        assert!(!policy.allows(RequestClass::Place, GamePhase::Countdown));
        policy.allow(RequestClass::Place, &[GamePhase::Countdown, GamePhase::Playing]);
        assert!(policy.allows(RequestClass::Place, GamePhase::Countdown));
        assert!(policy.allows(RequestClass::Customize, GamePhase::WaitingToStart));
        assert!(!policy.allows(RequestClass::Customize, GamePhase::Playing));
    }
}
