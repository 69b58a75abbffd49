use serde::Serialize;

use crate::state::phase_machine::{CluePhase, FinalPhase, GamePhase};

/// Flat phase label exposed to the UI layer.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Board is showing; the turn holder may pick a clue.
    #[default]
    Board,
    /// Daily double revealed; the selector is choosing a wager.
    DailyDoubleWager,
    /// A clue is live and the buzzers are open.
    BuzzerWait,
    /// One player holds the floor and is answering.
    Answering,
    /// The last answer's verdict is showing.
    Feedback,
    /// Final round: players are locking wagers.
    FinalWager,
    /// Final round: the clue is live and answers are being collected.
    FinalQuestion,
    /// Final round: results are showing; the session is over.
    FinalResults,
}

impl From<&GamePhase> for PhaseKind {
    fn from(value: &GamePhase) -> Self {
        match value {
            GamePhase::Board => PhaseKind::Board,
            GamePhase::Clue(CluePhase::Wagering { .. }) => PhaseKind::DailyDoubleWager,
            GamePhase::Clue(CluePhase::BuzzersOpen { .. }) => PhaseKind::BuzzerWait,
            GamePhase::Clue(CluePhase::Answering { .. }) => PhaseKind::Answering,
            GamePhase::Clue(CluePhase::Feedback { .. }) => PhaseKind::Feedback,
            GamePhase::Final(FinalPhase::Wagering) => PhaseKind::FinalWager,
            GamePhase::Final(FinalPhase::Question) => PhaseKind::FinalQuestion,
            GamePhase::Final(FinalPhase::Results) => PhaseKind::FinalResults,
        }
    }
}
