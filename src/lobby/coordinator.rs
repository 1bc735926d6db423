//! Session lifecycle and the match phase machine
//!
//! The coordinator owns every connected [`Session`] and the replicated
//! [`GamePhase`]. Phases advance on two kinds of triggers:
//!
//! - aggregate readiness (every connected session joined, every session
//!   finished the cinematic), evaluated as soon as a flag changes
//! - server-side timers, advanced by [`SessionLifecycleCoordinator::tick`]
//!
//! Transitions only ever move forward and `Finished` is terminal. Client
//! clocks are never consulted.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MatchConfig;
use crate::lobby::phase::{FinishReason, GamePhase};
use crate::lobby::session::{sanitize_name, sanitize_prompt, Customization, Session, SessionId};
use crate::replication::value::ReplicatedValue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("Match already in progress")]
    MatchInProgress,
    #[error("Match is full")]
    MatchFull,
    #[error("Unknown session {0}")]
    SessionUnknown(SessionId),
    #[error("Invalid display name")]
    InvalidName,
    #[error("Invalid prompt")]
    InvalidPrompt,
    #[error("Not allowed during {0:?}")]
    WrongPhase(GamePhase),
}

/// Phase durations in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTimings {
    pub first_prompt: f32,
    pub second_prompt: f32,
    /// Prompt timers may run this far below zero before the phase flips
    pub grace: f32,
    pub countdown: f32,
    pub gameplay: f32,
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self::from(&MatchConfig::default())
    }
}

impl From<&MatchConfig> for PhaseTimings {
    fn from(config: &MatchConfig) -> Self {
        Self {
            first_prompt: config.first_prompt_secs,
            second_prompt: config.second_prompt_secs,
            grace: config.timer_grace_secs,
            countdown: config.countdown_secs,
            gameplay: config.gameplay_secs,
        }
    }
}

/// Something the match server has to act on or broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    /// New phase entered; `timer` is the phase duration (0 if untimed)
    PhaseChanged { seq: u64, phase: GamePhase, timer: f32 },
    /// Prompts collected, map generation should start
    GenerationRequested { prompts: Vec<String> },
    /// Emitted exactly once, on entering Finished
    GameOver { reason: FinishReason },
}

pub struct SessionLifecycleCoordinator {
    sessions: BTreeMap<SessionId, Session>,
    next_session: SessionId,
    phase: ReplicatedValue<GamePhase>,
    /// Remaining time in the current timed phase
    timer: f32,
    timings: PhaseTimings,
    max_sessions: usize,
    min_sessions: usize,
    finish_reason: Option<FinishReason>,
    events: Vec<PhaseEvent>,
}

impl SessionLifecycleCoordinator {
    pub fn new(timings: PhaseTimings, max_sessions: usize, min_sessions: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_session: 1,
            phase: ReplicatedValue::new(GamePhase::WaitingToStart),
            timer: 0.0,
            timings,
            max_sessions,
            min_sessions,
            finish_reason: None,
            events: Vec::new(),
        }
    }

    #[inline]
    pub fn phase(&self) -> GamePhase {
        *self.phase.get()
    }

    /// Sequence number of the current phase value
    #[inline]
    pub fn phase_seq(&self) -> u64 {
        self.phase.seq()
    }

    /// Remaining time of the current timed phase (may be slightly negative
    /// inside a prompt grace window)
    #[inline]
    pub fn timer(&self) -> f32 {
        self.timer
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn is_connected(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Admit a new session. Only possible before the match starts.
    pub fn connect(&mut self, name: &str) -> Result<SessionId, LobbyError> {
        if self.phase() != GamePhase::WaitingToStart {
            return Err(LobbyError::MatchInProgress);
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(LobbyError::MatchFull);
        }
        let name = sanitize_name(name).ok_or(LobbyError::InvalidName)?;

        let id = self.next_session;
        self.next_session += 1;
        info!("Session {} connected as '{}'", id, name);
        self.sessions.insert(id, Session::new(id, name));
        Ok(id)
    }

    /// Remove a session. Aggregates are re-evaluated over the remaining
    /// sessions, and the match ends if too few are left.
    pub fn disconnect(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        info!("Session {} ('{}') disconnected", id, session.name);

        let phase = self.phase();
        if phase > GamePhase::WaitingToStart
            && !phase.is_terminal()
            && self.sessions.len() < self.min_sessions
        {
            warn!(
                "{} session(s) left, below minimum of {}",
                self.sessions.len(),
                self.min_sessions
            );
            self.finish(FinishReason::NotEnoughSessions);
        } else {
            self.check_aggregates();
        }
        Some(session)
    }

    pub fn signal_joined(&mut self, id: SessionId) -> Result<(), LobbyError> {
        let session = self.sessions.get_mut(&id).ok_or(LobbyError::SessionUnknown(id))?;
        if !session.joined {
            session.joined = true;
            debug!("Session {} joined", id);
            self.check_aggregates();
        }
        Ok(())
    }

    pub fn signal_cinematic_complete(&mut self, id: SessionId) -> Result<(), LobbyError> {
        if self.phase() != GamePhase::Cinematic {
            return Err(LobbyError::WrongPhase(self.phase()));
        }
        let session = self.sessions.get_mut(&id).ok_or(LobbyError::SessionUnknown(id))?;
        if !session.cinematic_done {
            session.cinematic_done = true;
            debug!("Session {} finished the cinematic", id);
            self.check_aggregates();
        }
        Ok(())
    }

    /// Store the session's prompt for the current prompt phase, replacing
    /// an earlier submission in the same phase.
    pub fn submit_prompt(&mut self, id: SessionId, text: &str) -> Result<(), LobbyError> {
        let slot = match self.phase() {
            GamePhase::FirstPrompt => 0,
            GamePhase::SecondPrompt => 1,
            other => return Err(LobbyError::WrongPhase(other)),
        };
        let prompt = sanitize_prompt(text).ok_or(LobbyError::InvalidPrompt)?;
        let session = self.sessions.get_mut(&id).ok_or(LobbyError::SessionUnknown(id))?;
        session.prompts[slot] = Some(prompt);
        Ok(())
    }

    pub fn customize(&mut self, id: SessionId, customization: Customization) -> Result<(), LobbyError> {
        if self.phase() >= GamePhase::Playing {
            return Err(LobbyError::WrongPhase(self.phase()));
        }
        let session = self.sessions.get_mut(&id).ok_or(LobbyError::SessionUnknown(id))?;
        session.customization = customization;
        Ok(())
    }

    /// Generated content is in place. Moves PromptGeneration to Cinematic;
    /// ignored in any other phase.
    pub fn content_ready(&mut self) -> bool {
        if self.phase() != GamePhase::PromptGeneration {
            debug!("content_ready ignored during {:?}", self.phase());
            return false;
        }
        self.advance_to(GamePhase::Cinematic)
    }

    /// Accept a declare-finished request. The first accepted request ends
    /// the match; later ones return `Ok(false)` and change nothing.
    pub fn declare_finished(&mut self, id: SessionId) -> Result<bool, LobbyError> {
        if !self.sessions.contains_key(&id) {
            return Err(LobbyError::SessionUnknown(id));
        }
        match self.phase() {
            GamePhase::Finished => Ok(false),
            GamePhase::Playing => Ok(self.finish(FinishReason::Declared { by: id })),
            other => Err(LobbyError::WrongPhase(other)),
        }
    }

    /// Advance timers and return every event produced since the last call
    pub fn tick(&mut self, dt: f32) -> Vec<PhaseEvent> {
        match self.phase() {
            GamePhase::FirstPrompt | GamePhase::SecondPrompt => {
                self.timer -= dt;
                if self.timer <= -self.timings.grace {
                    if let Some(next) = self.phase().next() {
                        self.advance_to(next);
                    }
                }
            }
            GamePhase::Countdown => {
                self.timer -= dt;
                if self.timer <= 0.0 {
                    self.advance_to(GamePhase::Playing);
                }
            }
            GamePhase::Playing => {
                self.timer -= dt;
                if self.timer <= 0.0 {
                    self.finish(FinishReason::TimeUp);
                }
            }
            GamePhase::WaitingToStart
            | GamePhase::PromptGeneration
            | GamePhase::Cinematic
            | GamePhase::Finished => {}
        }
        self.check_aggregates();
        self.drain_events()
    }

    pub fn drain_events(&mut self) -> Vec<PhaseEvent> {
        std::mem::take(&mut self.events)
    }

    /// Prompts in session order, first prompt before second
    pub fn collected_prompts(&self) -> Vec<String> {
        let mut prompts = Vec::new();
        for slot in 0..2 {
            for session in self.sessions.values() {
                if let Some(prompt) = &session.prompts[slot] {
                    prompts.push(prompt.clone());
                }
            }
        }
        prompts
    }

    fn check_aggregates(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        match self.phase() {
            GamePhase::WaitingToStart
                if self.sessions.len() >= self.min_sessions && self.sessions.values().all(|s| s.joined) =>
            {
                self.advance_to(GamePhase::FirstPrompt);
            }
            GamePhase::Cinematic if self.sessions.values().all(|s| s.cinematic_done) => {
                self.advance_to(GamePhase::Countdown);
            }
            _ => {}
        }
    }

    fn finish(&mut self, reason: FinishReason) -> bool {
        if self.phase().is_terminal() {
            return false;
        }
        self.finish_reason = Some(reason);
        self.advance_to(GamePhase::Finished)
    }

    /// Enter `next` if it is strictly later than the current phase
    fn advance_to(&mut self, next: GamePhase) -> bool {
        let current = self.phase();
        if next <= current {
            return false;
        }

        self.timer = match next {
            GamePhase::FirstPrompt => self.timings.first_prompt,
            GamePhase::SecondPrompt => self.timings.second_prompt,
            GamePhase::Countdown => self.timings.countdown,
            GamePhase::Playing => self.timings.gameplay,
            _ => 0.0,
        };
        self.phase.set(next);
        info!("Phase {:?} -> {:?}", current, next);

        self.events.push(PhaseEvent::PhaseChanged {
            seq: self.phase.seq(),
            phase: next,
            timer: self.timer,
        });
        match next {
            GamePhase::PromptGeneration => {
                let prompts = self.collected_prompts();
                self.events.push(PhaseEvent::GenerationRequested { prompts });
            }
            GamePhase::Finished => {
                let reason = self.finish_reason.unwrap_or(FinishReason::TimeUp);
                info!("Match finished: {:?}", reason);
                self.events.push(PhaseEvent::GameOver { reason });
            }
            _ => {}
        }
        true
    }
}

#[cfg(test)]
impl SessionLifecycleCoordinator {
    /// Jump forward to `phase`, discarding the events it produced
    pub(crate) fn force_phase(&mut self, phase: GamePhase) {
        self.advance_to(phase);
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> PhaseTimings {
        PhaseTimings {
            first_prompt: 1.0,
            second_prompt: 1.0,
            grace: 0.5,
            countdown: 0.5,
            gameplay: 2.0,
        }
    }

    fn coordinator() -> SessionLifecycleCoordinator {
        SessionLifecycleCoordinator::new(timings(), 4, 1)
    }

    fn phases(events: &[PhaseEvent]) -> Vec<GamePhase> {
        events
            .iter()
            .filter_map(|e| match e {
                PhaseEvent::PhaseChanged { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    /// Drive a fresh coordinator with two sessions to the given phase
    fn coordinator_in(target: GamePhase) -> (SessionLifecycleCoordinator, SessionId, SessionId) {
        let mut c = coordinator();
        let a = c.connect("A").unwrap();
        let b = c.connect("B").unwrap();
        c.signal_joined(a).unwrap();
        c.signal_joined(b).unwrap();
        while c.phase() < target {
            match c.phase() {
                GamePhase::PromptGeneration => {
                    c.content_ready();
                }
                GamePhase::Cinematic => {
                    c.signal_cinematic_complete(a).unwrap();
                    c.signal_cinematic_complete(b).unwrap();
                }
                _ => {
                    c.tick(0.25);
                }
            }
        }
        c.drain_events();
        (c, a, b)
    }

    #[test]
    fn test_start_waits_for_min_sessions() {
        let mut c = SessionLifecycleCoordinator::new(timings(), 4, 2);
        let a = c.connect("A").unwrap();
        c.signal_joined(a).unwrap();
        c.tick(0.1);
        assert_eq!(c.phase(), GamePhase::WaitingToStart);

        let b = c.connect("B").unwrap();
        c.signal_joined(b).unwrap();
        c.tick(0.1);
        assert_eq!(c.phase(), GamePhase::FirstPrompt);
    }

    #[test]
    fn test_all_joined_starts_first_prompt() {
        let mut c = coordinator();
        let a = c.connect("A").unwrap();
        let b = c.connect("B").unwrap();

        c.signal_joined(a).unwrap();
        assert_eq!(c.phase(), GamePhase::WaitingToStart);

        c.signal_joined(b).unwrap();
        let events = c.tick(0.02);
        assert_eq!(c.phase(), GamePhase::FirstPrompt);
        assert_eq!(phases(&events), vec![GamePhase::FirstPrompt]);
    }

    #[test]
    fn test_no_sessions_never_starts() {
        let mut c = coordinator();
        for _ in 0..10 {
            c.tick(1.0);
        }
        assert_eq!(c.phase(), GamePhase::WaitingToStart);
    }

    #[test]
    fn test_prompt_timer_grace_window() {
        let (mut c, _, _) = coordinator_in(GamePhase::FirstPrompt);

        // 1.0s phase + 0.5s grace, 0.25s ticks
        for _ in 0..5 {
            c.tick(0.25);
            assert_eq!(c.phase(), GamePhase::FirstPrompt);
        }
        assert!(c.timer() < 0.0);

        c.tick(0.25);
        assert_eq!(c.phase(), GamePhase::SecondPrompt);
        assert_eq!(c.timer(), 1.0);
    }

    #[test]
    fn test_prompt_generation_collects_prompts() {
        let (mut c, a, b) = coordinator_in(GamePhase::FirstPrompt);
        c.submit_prompt(a, "lava river").unwrap();
        c.submit_prompt(b, "ice bridge").unwrap();
        for _ in 0..6 {
            c.tick(0.25);
        }
        assert_eq!(c.phase(), GamePhase::SecondPrompt);
        c.submit_prompt(a, "giant ramp").unwrap();

        let mut events = Vec::new();
        for _ in 0..6 {
            events.extend(c.tick(0.25));
        }
        assert_eq!(c.phase(), GamePhase::PromptGeneration);
        assert!(events.contains(&PhaseEvent::GenerationRequested {
            prompts: vec![
                "lava river".to_string(),
                "ice bridge".to_string(),
                "giant ramp".to_string()
            ]
        }));
    }

    #[test]
    fn test_prompt_outside_prompt_phase() {
        let mut c = coordinator();
        let a = c.connect("A").unwrap();
        assert_eq!(
            c.submit_prompt(a, "hello"),
            Err(LobbyError::WrongPhase(GamePhase::WaitingToStart))
        );
    }

    #[test]
    fn test_generation_waits_for_content() {
        let (mut c, _, _) = coordinator_in(GamePhase::PromptGeneration);
        for _ in 0..100 {
            c.tick(1.0);
        }
        assert_eq!(c.phase(), GamePhase::PromptGeneration);

        assert!(c.content_ready());
        assert_eq!(c.phase(), GamePhase::Cinematic);
        assert!(!c.content_ready());
    }

    #[test]
    fn test_cinematic_needs_every_session() {
        let (mut c, a, b) = coordinator_in(GamePhase::Cinematic);
        c.signal_cinematic_complete(a).unwrap();
        // Duplicate signal does not count twice
        c.signal_cinematic_complete(a).unwrap();
        assert_eq!(c.phase(), GamePhase::Cinematic);

        c.signal_cinematic_complete(b).unwrap();
        assert_eq!(c.phase(), GamePhase::Countdown);
        assert_eq!(c.timer(), 0.5);
    }

    #[test]
    fn test_countdown_then_playing() {
        let (mut c, _, _) = coordinator_in(GamePhase::Countdown);
        c.tick(0.25);
        assert_eq!(c.phase(), GamePhase::Countdown);
        c.tick(0.25);
        assert_eq!(c.phase(), GamePhase::Playing);
        assert_eq!(c.timer(), 2.0);
    }

    #[test]
    fn test_gameplay_timer_finishes_once() {
        let (mut c, _, _) = coordinator_in(GamePhase::Playing);

        let mut events = Vec::new();
        for _ in 0..40 {
            events.extend(c.tick(0.25));
        }
        assert_eq!(c.phase(), GamePhase::Finished);
        assert_eq!(phases(&events), vec![GamePhase::Finished]);
        let game_overs = events
            .iter()
            .filter(|e| matches!(e, PhaseEvent::GameOver { .. }))
            .count();
        assert_eq!(game_overs, 1);
        assert_eq!(c.finish_reason(), Some(FinishReason::TimeUp));
    }

    #[test]
    fn test_declare_finished_idempotent() {
        let (mut c, a, b) = coordinator_in(GamePhase::Playing);

        assert_eq!(c.declare_finished(a), Ok(true));
        assert_eq!(c.declare_finished(a), Ok(false));
        assert_eq!(c.declare_finished(b), Ok(false));

        let events = c.tick(0.25);
        assert_eq!(phases(&events), vec![GamePhase::Finished]);
        assert_eq!(c.finish_reason(), Some(FinishReason::Declared { by: a }));
        assert_eq!(c.phase(), GamePhase::Finished);
    }

    #[test]
    fn test_declare_finished_before_playing() {
        let (mut c, a, _) = coordinator_in(GamePhase::Countdown);
        assert_eq!(
            c.declare_finished(a),
            Err(LobbyError::WrongPhase(GamePhase::Countdown))
        );
    }

    #[test]
    fn test_phase_is_monotonic() {
        let (mut c, _, _) = coordinator_in(GamePhase::Playing);
        assert!(!c.advance_to(GamePhase::Countdown));
        assert!(!c.advance_to(GamePhase::Playing));
        assert_eq!(c.phase(), GamePhase::Playing);
    }

    #[test]
    fn test_phase_seq_increments_per_transition() {
        let (c, _, _) = coordinator_in(GamePhase::Playing);
        assert_eq!(c.phase_seq(), GamePhase::Playing.index());
    }

    #[test]
    fn test_late_join_rejected() {
        let (mut c, _, _) = coordinator_in(GamePhase::FirstPrompt);
        assert_eq!(c.connect("Late"), Err(LobbyError::MatchInProgress));
    }

    #[test]
    fn test_match_full() {
        let mut c = SessionLifecycleCoordinator::new(timings(), 1, 1);
        c.connect("A").unwrap();
        assert_eq!(c.connect("B"), Err(LobbyError::MatchFull));
    }

    #[test]
    fn test_invalid_name() {
        let mut c = coordinator();
        assert_eq!(c.connect(" \t "), Err(LobbyError::InvalidName));
    }

    #[test]
    fn test_disconnect_completes_aggregate() {
        let mut c = coordinator();
        let a = c.connect("A").unwrap();
        let b = c.connect("B").unwrap();
        c.signal_joined(a).unwrap();

        c.disconnect(b);
        assert_eq!(c.phase(), GamePhase::FirstPrompt);
    }

    #[test]
    fn test_everyone_leaving_finishes_match() {
        let (mut c, a, b) = coordinator_in(GamePhase::SecondPrompt);
        c.disconnect(a);
        assert_eq!(c.phase(), GamePhase::SecondPrompt);
        c.disconnect(b);
        assert_eq!(c.phase(), GamePhase::Finished);
        assert_eq!(c.finish_reason(), Some(FinishReason::NotEnoughSessions));
    }

    #[test]
    fn test_customize_before_playing_only() {
        let (mut c, a, _) = coordinator_in(GamePhase::Countdown);
        let custom = Customization { color_index: 2, hat_index: 1 };
        c.customize(a, custom).unwrap();
        assert_eq!(c.session(a).unwrap().customization, custom);

        c.tick(0.5);
        assert_eq!(c.phase(), GamePhase::Playing);
        assert!(c.customize(a, Customization::default()).is_err());
    }

    #[test]
    fn test_unknown_session() {
        let mut c = coordinator();
        assert_eq!(c.signal_joined(42), Err(LobbyError::SessionUnknown(42)));
    }
}
