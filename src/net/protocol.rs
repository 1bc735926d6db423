//! Wire messages between Unity clients and the match server
//!
//! Both directions are bincode-encoded enums carried in length-prefixed
//! frames (see `framing`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authority::validator::Rejection;
use crate::game::entity::{EntityId, EntityKind, EntitySnapshot, FieldUpdate, SizeTier, Transform};
use crate::game::map_grid::TileGrid;
use crate::lobby::phase::{FinishReason, GamePhase};
use crate::lobby::session::{Customization, SessionId};

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMessage {
    /// Request to join the match
    Join { name: String },
    /// Mutation or lifecycle request, validated by the server
    Request(RequestKind),
    /// Leave the match
    Leave,
    /// Ping for latency measurement
    Ping { timestamp: u64 },
}

/// What a session asks the server to do
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RequestKind {
    /// Act on an existing entity. `claimed_owner` is the owner the client
    /// believed the entity had when it issued the request.
    Entity {
        target: EntityId,
        claimed_owner: Option<SessionId>,
        action: Action,
    },
    /// Place a new boat or structure
    Place { kind: EntityKind, transform: Transform },
    /// Finished loading into the match scene
    SignalJoined,
    /// Finished the intro cinematic
    SignalCinematicComplete,
    SubmitPrompt { text: String },
    /// Win condition reached on the client (re-validated on the server)
    DeclareFinished,
    Customize(Customization),
}

/// Entity-targeted actions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Action {
    /// Owner's simulated transform for this physics tick
    PushTransform(Transform),
    /// Change a boulder's size tier
    Resize(SizeTier),
    /// Board a boat (takes ownership)
    Mount,
    /// Leave a boat (gives ownership up)
    Dismount,
    /// Give ownership to another session
    HandOff { to: SessionId },
    ClaimOwnership,
    ReleaseOwnership,
    /// Remove an owned boat or structure
    Despawn,
}

impl RequestKind {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::Entity { action, .. } => action.label(),
            RequestKind::Place { .. } => "place",
            RequestKind::SignalJoined => "signal_joined",
            RequestKind::SignalCinematicComplete => "signal_cinematic_complete",
            RequestKind::SubmitPrompt { .. } => "submit_prompt",
            RequestKind::DeclareFinished => "declare_finished",
            RequestKind::Customize(_) => "customize",
        }
    }
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::PushTransform(_) => "push_transform",
            Action::Resize(_) => "resize",
            Action::Mount => "mount",
            Action::Dismount => "dismount",
            Action::HandOff { .. } => "hand_off",
            Action::ClaimOwnership => "claim_ownership",
            Action::ReleaseOwnership => "release_ownership",
            Action::Despawn => "despawn",
        }
    }
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMessage {
    /// Confirmation of joining with the assigned session id
    JoinAccepted { session: SessionId, match_id: Uuid },
    /// Join was rejected
    JoinRejected { reason: String },
    /// Full match state, sent once after joining
    Snapshot(MatchSnapshot),
    /// One replicated field changed
    Field(FieldUpdate),
    OwnerChanged {
        entity: EntityId,
        previous: Option<SessionId>,
        owner: Option<SessionId>,
    },
    EntitySpawned(EntitySnapshot),
    EntityDespawned { entity: EntityId },
    /// Match phase changed; `timer` is the new phase's duration
    PhaseChange { seq: u64, phase: GamePhase, timer: f32 },
    /// Generated (or fallback) map is ready
    MapReady(TileGrid),
    GameOver { reason: FinishReason },
    /// A request was refused. Diagnostic only: the authoritative state that
    /// follows is what the client must converge to.
    Rejected { request: String, reason: Rejection },
    SessionJoined { session: SessionId, name: String },
    SessionLeft { session: SessionId },
    /// Pong response with server timestamp
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub customization: Customization,
}

/// Everything a joining client needs to build its replica
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchSnapshot {
    pub match_id: Uuid,
    pub tick: u64,
    pub phase: GamePhase,
    pub phase_seq: u64,
    pub timer: f32,
    pub sessions: Vec<SessionInfo>,
    pub entities: Vec<EntitySnapshot>,
    pub map: Option<TileGrid>,
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers (simple to decode on the client)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
