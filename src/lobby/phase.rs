use serde::{Deserialize, Serialize};

use crate::lobby::session::SessionId;

/// Process-wide match phase. Variants are declared in transition order, so
/// the derived `Ord` is the order phases are entered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    /// Sessions connecting and loading in
    #[default]
    WaitingToStart,
    FirstPrompt,
    SecondPrompt,
    /// Waiting on the map generator
    PromptGeneration,
    /// Intro cinematic playing on every client
    Cinematic,
    Countdown,
    Playing,
    /// Terminal
    Finished,
}

impl GamePhase {
    pub fn is_prompt(&self) -> bool {
        matches!(self, GamePhase::FirstPrompt | GamePhase::SecondPrompt)
    }

    pub fn is_terminal(&self) -> bool {
        *self == GamePhase::Finished
    }

    /// Phase after this one on the normal path
    pub fn next(&self) -> Option<GamePhase> {
        match self {
            GamePhase::WaitingToStart => Some(GamePhase::FirstPrompt),
            GamePhase::FirstPrompt => Some(GamePhase::SecondPrompt),
            GamePhase::SecondPrompt => Some(GamePhase::PromptGeneration),
            GamePhase::PromptGeneration => Some(GamePhase::Cinematic),
            GamePhase::Cinematic => Some(GamePhase::Countdown),
            GamePhase::Countdown => Some(GamePhase::Playing),
            GamePhase::Playing => Some(GamePhase::Finished),
            GamePhase::Finished => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GamePhase::WaitingToStart => "waiting_to_start",
            GamePhase::FirstPrompt => "first_prompt",
            GamePhase::SecondPrompt => "second_prompt",
            GamePhase::PromptGeneration => "prompt_generation",
            GamePhase::Cinematic => "cinematic",
            GamePhase::Countdown => "countdown",
            GamePhase::Playing => "playing",
            GamePhase::Finished => "finished",
        }
    }

    /// Numeric gauge value for metrics
    pub fn index(&self) -> u64 {
        *self as u64
    }
}

/// Why the match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// Gameplay timer ran out
    TimeUp,
    /// A session's declare-finished request was accepted
    Declared { by: SessionId },
    /// Connected sessions dropped below the minimum
    NotEnoughSessions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_matches_transitions() {
        let mut phase = GamePhase::WaitingToStart;
        let mut steps = 0;
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            steps += 1;
        }
        assert_eq!(phase, GamePhase::Finished);
        assert_eq!(steps, 7);
        assert!(phase.is_terminal());
    }

    #[test]
    fn test_prompt_phases() {
        assert!(GamePhase::FirstPrompt.is_prompt());
        assert!(GamePhase::SecondPrompt.is_prompt());
        assert!(!GamePhase::PromptGeneration.is_prompt());
    }

    #[test]
    fn test_phase_index() {
        assert_eq!(GamePhase::WaitingToStart.index(), 0);
        assert_eq!(GamePhase::Finished.index(), 7);
    }
}
