//! Match server - owns the authoritative state and runs the tick loop
//!
//! Every tick drains the request queue, validates each request against
//! current state, applies the accepted ones in arrival order, advances the
//! phase machine and turns the resulting changes into outbound messages.

use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authority::validator::{AuthorityValidator, PhasePolicy, Rejection, ValidationContext};
use crate::config::{MatchConfig, ServerConfig};
use crate::game::constants::{net, placement};
use crate::game::entity::{
    DisconnectPolicy, EntityId, EntityKind, FieldId, FieldUpdate, FieldValue, Transform,
};
use crate::game::map_grid::TileGrid;
use crate::game::request_queue::{Request, RequestQueue, RequestSender};
use crate::game::world::{Spawner, World};
use crate::lobby::coordinator::{LobbyError, PhaseEvent, PhaseTimings, SessionLifecycleCoordinator};
use crate::lobby::phase::GamePhase;
use crate::lobby::session::SessionId;
use crate::map_gen::{generate_with_fallback, MapProvider};
use crate::metrics::Metrics;
use crate::net::protocol::{encode, Action, MatchSnapshot, RequestKind, ServerMessage, SessionInfo};
use crate::replication::ownership::OwnershipRegistry;
use crate::util::vec3::Vec3;

/// Who an outbound message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    To(SessionId),
    AllExcept(SessionId),
}

impl Target {
    pub fn includes(&self, session: SessionId) -> bool {
        match self {
            Target::All => true,
            Target::To(id) => *id == session,
            Target::AllExcept(id) => *id != session,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub message: ServerMessage,
}

/// Outcome of one server tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub accepted: usize,
    pub rejected: usize,
    pub ownership_changes: usize,
}

pub struct MatchServer {
    match_id: Uuid,
    config: MatchConfig,
    coordinator: SessionLifecycleCoordinator,
    registry: OwnershipRegistry,
    world: World,
    validator: AuthorityValidator,
    queue: RequestQueue,
    outbox: Vec<Outbound>,
    tick: u64,
    map: Option<TileGrid>,
    pending_generation: Option<Vec<String>>,
}

impl MatchServer {
    pub fn new(server: &ServerConfig, config: MatchConfig) -> Self {
        let coordinator = SessionLifecycleCoordinator::new(
            PhaseTimings::from(&config),
            server.max_sessions,
            server.min_sessions,
        );
        let validator = AuthorityValidator::new(PhasePolicy::default(), config.placement_margin);
        let match_id = Uuid::new_v4();
        info!("Match {} created", match_id);

        Self {
            match_id,
            config,
            coordinator,
            registry: OwnershipRegistry::new(),
            world: World::new(),
            validator,
            queue: RequestQueue::new(net::REQUEST_QUEUE_CAPACITY),
            outbox: Vec::new(),
            tick: 0,
            map: None,
            pending_generation: None,
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn phase(&self) -> GamePhase {
        self.coordinator.phase()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn coordinator(&self) -> &SessionLifecycleCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &OwnershipRegistry {
        &self.registry
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn map(&self) -> Option<&TileGrid> {
        self.map.as_ref()
    }

    /// Entities that currently have an owner
    pub fn owned_count(&self) -> usize {
        self.world
            .iter()
            .filter(|e| matches!(self.registry.owner_of(e.id), Ok(Some(_))))
            .count()
    }

    /// Admit a session and spawn its avatar and boulder
    pub fn connect(&mut self, name: &str) -> Result<SessionId, LobbyError> {
        let id = self.coordinator.connect(name)?;

        let origin = Vec3::new((id - 1) as f32 * placement::SPAWN_SPACING, 0.0, 0.0);
        let avatar = self.spawn_owned(EntityKind::Avatar, Transform::at(origin), id);
        let boulder = self.spawn_owned(
            EntityKind::Boulder,
            Transform::at(origin + Vec3::new(0.0, 0.0, 3.0)),
            id,
        );

        let name = match self.coordinator.session_mut(id) {
            Some(session) => {
                session.avatar = Some(avatar);
                session.boulder = Some(boulder);
                session.name.clone()
            }
            None => return Err(LobbyError::SessionUnknown(id)),
        };

        self.push(
            Target::To(id),
            ServerMessage::JoinAccepted {
                session: id,
                match_id: self.match_id,
            },
        );
        let snapshot = self.snapshot();
        self.push(Target::To(id), ServerMessage::Snapshot(snapshot));
        self.push(Target::AllExcept(id), ServerMessage::SessionJoined { session: id, name });
        for entity in [avatar, boulder] {
            if let Some(e) = self.world.get(entity) {
                let spawned = ServerMessage::EntitySpawned(e.snapshot(Some(id)));
                self.push(Target::AllExcept(id), spawned);
            }
        }
        self.flush_state();
        Ok(id)
    }

    /// Drop a session and apply each owned entity's disconnect policy.
    /// Returns false for unknown sessions.
    pub fn disconnect(&mut self, id: SessionId) -> bool {
        let Some(session) = self.coordinator.disconnect(id) else {
            return false;
        };

        let mut owned = self.registry.owned_by(id).to_vec();
        if let Some(avatar) = session.avatar {
            if !owned.contains(&avatar) {
                owned.push(avatar);
            }
        }

        for entity in owned {
            let Some(kind) = self.world.get(entity).map(|e| e.kind) else {
                continue;
            };
            match kind.disconnect_policy() {
                DisconnectPolicy::Despawn => self.despawn(entity),
                DisconnectPolicy::Release => {
                    self.registry.release_ownership(entity, id);
                }
            }
        }

        for entity in self.world.sorted_ids() {
            if let Some(e) = self.world.get_mut(entity) {
                if e.mounted_by() == Some(Some(id)) {
                    e.set_mounted_by(None);
                }
            }
        }

        self.push(Target::All, ServerMessage::SessionLeft { session: id });
        let events = self.coordinator.drain_events();
        self.handle_phase_events(events);
        self.flush_state();
        true
    }

    /// Queue a request for the next tick. False if the queue is full.
    pub fn submit(&self, sender: SessionId, kind: RequestKind) -> bool {
        self.queue.try_submit(Request::new(sender, kind))
    }

    /// Handle for connection tasks to queue requests without the server lock
    pub fn request_sender(&self) -> RequestSender {
        self.queue.sender()
    }

    /// Run one fixed step
    pub fn tick(&mut self, dt: f32) -> TickReport {
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        for request in self.queue.drain() {
            match self.process(&request) {
                Ok(()) => report.accepted += 1,
                Err(reason) => {
                    report.rejected += 1;
                    debug!(
                        "Rejected {} from session {}: {}",
                        request.kind.label(),
                        request.sender,
                        reason
                    );
                    if self.coordinator.is_connected(request.sender) {
                        self.push(
                            Target::To(request.sender),
                            ServerMessage::Rejected {
                                request: request.kind.label().to_string(),
                                reason,
                            },
                        );
                    }
                }
            }
        }

        let events = self.coordinator.tick(dt);
        self.handle_phase_events(events);
        report.ownership_changes = self.flush_state();
        report
    }

    /// Install generated content. Only takes effect during PromptGeneration.
    pub fn content_ready(&mut self, grid: TileGrid) -> bool {
        if self.coordinator.phase() != GamePhase::PromptGeneration {
            debug!("Map arrived during {:?}, ignored", self.coordinator.phase());
            return false;
        }
        self.map = Some(grid.clone());
        self.push(Target::All, ServerMessage::MapReady(grid));
        let advanced = self.coordinator.content_ready();
        let events = self.coordinator.drain_events();
        self.handle_phase_events(events);
        advanced
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            match_id: self.match_id,
            tick: self.tick,
            phase: self.coordinator.phase(),
            phase_seq: self.coordinator.phase_seq(),
            timer: self.coordinator.timer(),
            sessions: self
                .coordinator
                .sessions()
                .map(|s| SessionInfo {
                    id: s.id,
                    name: s.name.clone(),
                    customization: s.customization,
                })
                .collect(),
            entities: self.world.snapshot(&self.registry),
            map: self.map.clone(),
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Prompts to generate a map from, handed out once
    pub fn take_generation_request(&mut self) -> Option<Vec<String>> {
        self.pending_generation.take()
    }

    fn process(&mut self, request: &Request) -> Result<(), Rejection> {
        let ctx = ValidationContext {
            coordinator: &self.coordinator,
            registry: &self.registry,
            world: &self.world,
        };
        self.validator.validate(request, &ctx)?;
        self.execute(request)
    }

    fn execute(&mut self, request: &Request) -> Result<(), Rejection> {
        let sender = request.sender;
        match &request.kind {
            RequestKind::Entity { target, action, .. } => self.execute_action(sender, *target, action),
            RequestKind::Place { kind, transform } => {
                let id = self.world.spawn(*kind, *transform);
                self.registry.register_owned(id, sender);
                if let Some(e) = self.world.get(id) {
                    let spawned = ServerMessage::EntitySpawned(e.snapshot(Some(sender)));
                    self.push(Target::All, spawned);
                }
                debug!("Session {} placed {} {}", sender, kind.name(), id);
                Ok(())
            }
            RequestKind::SignalJoined => Ok(self.coordinator.signal_joined(sender)?),
            RequestKind::SignalCinematicComplete => Ok(self.coordinator.signal_cinematic_complete(sender)?),
            RequestKind::SubmitPrompt { text } => Ok(self.coordinator.submit_prompt(sender, text)?),
            RequestKind::DeclareFinished => {
                if !self.coordinator.declare_finished(sender)? {
                    debug!("Session {} declared finished after match end", sender);
                }
                Ok(())
            }
            RequestKind::Customize(customization) => Ok(self.coordinator.customize(sender, *customization)?),
        }
    }

    fn execute_action(&mut self, sender: SessionId, target: EntityId, action: &Action) -> Result<(), Rejection> {
        match action {
            Action::PushTransform(transform) => {
                if let Some(e) = self.world.get_mut(target) {
                    e.transform.set(*transform);
                }
            }
            Action::Resize(tier) => {
                if let Some(e) = self.world.get_mut(target) {
                    e.set_size_tier(*tier);
                }
            }
            Action::Mount => {
                self.registry.request_ownership(target, sender)?;
                if let Some(e) = self.world.get_mut(target) {
                    e.set_mounted_by(Some(sender));
                }
            }
            Action::Dismount => {
                if let Some(e) = self.world.get_mut(target) {
                    e.set_mounted_by(None);
                }
                self.registry.release_ownership(target, sender);
            }
            Action::HandOff { to } => {
                self.registry.transfer_ownership(target, sender, *to)?;
                self.clear_rider(target);
            }
            Action::ClaimOwnership => self.registry.request_ownership(target, sender)?,
            Action::ReleaseOwnership => {
                if self.registry.release_ownership(target, sender) {
                    self.clear_rider(target);
                }
            }
            Action::Despawn => self.despawn(target),
        }
        Ok(())
    }

    fn clear_rider(&mut self, target: EntityId) {
        if let Some(e) = self.world.get_mut(target) {
            if matches!(e.mounted_by(), Some(Some(_))) {
                e.set_mounted_by(None);
            }
        }
    }

    fn spawn_owned(&mut self, kind: EntityKind, transform: Transform, owner: SessionId) -> EntityId {
        let id = self.world.spawn(kind, transform);
        self.registry.register_owned(id, owner);
        id
    }

    fn despawn(&mut self, entity: EntityId) {
        self.registry.unregister(entity);
        if self.world.despawn(entity).is_some() {
            self.push(Target::All, ServerMessage::EntityDespawned { entity });
        }
    }

    fn handle_phase_events(&mut self, events: Vec<PhaseEvent>) {
        for event in events {
            match event {
                PhaseEvent::PhaseChanged { seq, phase, timer } => {
                    self.push(Target::All, ServerMessage::PhaseChange { seq, phase, timer });
                }
                PhaseEvent::GenerationRequested { prompts } => {
                    info!("Map generation requested with {} prompt(s)", prompts.len());
                    self.pending_generation = Some(prompts);
                }
                PhaseEvent::GameOver { reason } => {
                    self.push(Target::All, ServerMessage::GameOver { reason });
                }
            }
        }
    }

    /// Turn ownership events and dirty fields into messages. Returns the
    /// number of ownership changes flushed.
    fn flush_state(&mut self) -> usize {
        let ownership = self.registry.drain_events();
        let changes = ownership.len();
        for event in ownership {
            // Despawned in the same tick, the EntityDespawned already covers it
            let Some(entity) = self.world.get(event.entity) else {
                continue;
            };
            // The former owner never received its own pushes back, so its
            // mirror is stale until it gets the current pose
            let correction = event
                .previous
                .filter(|p| event.owner != Some(*p) && self.coordinator.session(*p).is_some())
                .map(|p| {
                    let value = FieldValue::Transform(*entity.transform.get());
                    (p, FieldUpdate::new(event.entity, entity.transform.seq(), value))
                });

            self.push(
                Target::All,
                ServerMessage::OwnerChanged {
                    entity: event.entity,
                    previous: event.previous,
                    owner: event.owner,
                },
            );
            if let Some((previous, update)) = correction {
                self.push(Target::To(previous), ServerMessage::Field(update));
            }
        }

        for update in self.world.drain_dirty() {
            let target = self.field_target(&update);
            self.push(target, ServerMessage::Field(update));
        }
        changes
    }

    /// Owner-pushed transforms are not echoed back to the owner
    fn field_target(&self, update: &FieldUpdate) -> Target {
        match (update.field, self.registry.owner_of(update.entity)) {
            (FieldId::Transform, Ok(Some(owner))) => Target::AllExcept(owner),
            _ => Target::All,
        }
    }

    fn push(&mut self, target: Target, message: ServerMessage) {
        self.outbox.push(Outbound { target, message });
    }
}

/// Encoded message shared across every recipient
pub type Frame = Arc<Vec<u8>>;

/// Per-session outbound queues. Connection tasks own the receiving ends and
/// write frames to their streams.
#[derive(Default)]
pub struct SessionRouter {
    senders: RwLock<HashMap<SessionId, mpsc::Sender<Frame>>>,
}

impl SessionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the receiving end of its queue
    pub fn register(&self, session: SessionId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(net::OUTBOUND_QUEUE_DEPTH);
        self.senders.write().insert(session, tx);
        rx
    }

    pub fn unregister(&self, session: SessionId) {
        self.senders.write().remove(&session);
    }

    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.read().is_empty()
    }

    /// Encode each message once and queue it for its recipients. Sessions
    /// whose queue is full or closed are dropped from the router; their
    /// connection task notices and disconnects them.
    pub fn dispatch(&self, outbox: Vec<Outbound>, metrics: &Metrics) {
        use std::sync::atomic::Ordering;

        let mut stalled = Vec::new();
        {
            let senders = self.senders.read();
            for outbound in outbox {
                let frame: Frame = match encode(&outbound.message) {
                    Ok(bytes) => Arc::new(bytes),
                    Err(e) => {
                        warn!("Failed to encode outbound message: {}", e);
                        continue;
                    }
                };
                for (session, tx) in senders.iter() {
                    if !outbound.target.includes(*session) || stalled.contains(session) {
                        continue;
                    }
                    match tx.try_send(frame.clone()) {
                        Ok(()) => {
                            metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                            metrics.bytes_sent.fetch_add(frame.len() as u64 + 4, Ordering::Relaxed);
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Outbound queue full for session {}, dropping it", session);
                            stalled.push(*session);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => stalled.push(*session),
                    }
                }
            }
        }

        if !stalled.is_empty() {
            let mut senders = self.senders.write();
            for session in stalled {
                senders.remove(&session);
            }
        }
    }
}

fn update_gauges(server: &MatchServer, report: &TickReport, metrics: &Metrics) {
    use std::sync::atomic::Ordering;

    metrics
        .sessions_connected
        .store(server.coordinator.session_count() as u64, Ordering::Relaxed);
    metrics.entities.store(server.world.len() as u64, Ordering::Relaxed);
    metrics
        .owned_entities
        .store(server.owned_count() as u64, Ordering::Relaxed);
    metrics.phase.store(server.phase().index(), Ordering::Relaxed);
    metrics
        .requests_accepted
        .fetch_add(report.accepted as u64, Ordering::Relaxed);
    metrics
        .requests_rejected
        .fetch_add(report.rejected as u64, Ordering::Relaxed);
    metrics
        .ownership_changes
        .fetch_add(report.ownership_changes as u64, Ordering::Relaxed);
}

/// Drive the match at the configured tick rate until it finishes
pub async fn run_match_loop(
    server: Arc<tokio::sync::RwLock<MatchServer>>,
    router: Arc<SessionRouter>,
    provider: Arc<dyn MapProvider>,
    metrics: Arc<Metrics>,
) {
    let (tick_interval, dt, timeout, tick_rate) = {
        let guard = server.read().await;
        let config = guard.config();
        (config.tick_interval(), config.dt(), config.map_generation_timeout(), config.tick_rate)
    };
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Match loop started at {} Hz", tick_rate);

    loop {
        ticker.tick().await;
        let started = Instant::now();

        let (outbox, generation, finished) = {
            let mut guard = server.write().await;
            let report = guard.tick(dt);
            update_gauges(&guard, &report, &metrics);
            (
                guard.drain_outbox(),
                guard.take_generation_request(),
                guard.phase().is_terminal(),
            )
        };
        router.dispatch(outbox, &metrics);

        if let Some(prompts) = generation {
            let server = server.clone();
            let provider = provider.clone();
            tokio::spawn(async move {
                let grid = generate_with_fallback(provider.as_ref(), &prompts, timeout).await;
                // Broadcast on the next tick
                server.write().await.content_ready(grid);
            });
        }

        metrics.record_tick_time(started.elapsed());

        if finished {
            info!("Match finished, stopping match loop");
            break;
        }
    }
}
