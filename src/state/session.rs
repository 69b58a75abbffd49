use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dto::snapshot::{ClueSnapshot, ParticipantSnapshot, SessionSnapshot};

/// Which game a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Straight quiz with fixed turn order.
    Quiz,
    /// Bingo-card variant.
    Bingo,
    /// Board-and-buzzer variant with daily doubles and a final round.
    Jeopardy,
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Lobby; players may still join.
    Waiting,
    /// Game in progress.
    Active,
    /// Game over; scores are final.
    Completed,
}

/// Board lifecycle state of a clue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClueState {
    /// Still face-down on the board.
    Hidden,
    /// Revealed and in play.
    Revealed,
    /// Answered or skipped; out of play.
    Spent,
}

/// A player in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Stable user identifier; participants are unique by this.
    pub user_id: Uuid,
    /// Display name chosen by the player.
    pub display_name: String,
    /// Current score; may go negative.
    pub score: i64,
}

/// One unit of play on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clue {
    /// Clue identifier.
    pub id: Uuid,
    /// Category label.
    pub category: String,
    /// Point value.
    pub value: i64,
    /// Prompt text; empty until revealed.
    pub prompt: String,
    /// Board lifecycle state.
    pub state: ClueState,
    /// Whether the clue is a daily double.
    pub daily_double: bool,
    /// Whether the clue belongs to the final round.
    pub final_round: bool,
    /// Player who revealed the clue, once revealed.
    pub selected_by: Option<Uuid>,
    /// Correct answer, when this client is allowed to see it.
    pub answer: Option<String>,
}

/// An ordered record of one buzzer press, scoped to one clue.
///
/// Ranks are assigned by the server in arrival order; the client only
/// displays them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuzzerPress {
    /// Player who pressed.
    pub player_id: Uuid,
    /// 1-based arrival order.
    pub rank: u32,
    /// Server-side arrival time.
    pub pressed_at: OffsetDateTime,
}

/// A locked wager, scoped to one daily double or to the final round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wager {
    /// Player wagering.
    pub player_id: Uuid,
    /// Amount wagered.
    pub amount: i64,
    /// When the wager was locked server-side.
    pub submitted_at: OffsetDateTime,
}

/// Cached copy of one multiplayer game session.
///
/// The server owns this data; the client replaces the copy wholesale from
/// snapshots and keeps it current from change events.
#[derive(Debug, Clone)]
pub struct GameSession {
    /// Session identifier.
    pub id: Uuid,
    /// Which game this session plays.
    pub kind: GameKind,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Current round number, 1-based.
    pub round: u32,
    /// Server sequence number the copy reflects.
    pub seq: u64,
    /// Player whose turn it is to pick the next clue.
    pub turn_player: Option<Uuid>,
    /// Participants in join order, keyed by user id.
    pub participants: IndexMap<Uuid, Participant>,
    /// Clues on the board keyed by clue id, including the final-round clue.
    pub board: IndexMap<Uuid, Clue>,
    /// Clue currently in play, if any.
    pub current_clue: Option<Uuid>,
}

impl GameSession {
    /// The clue currently in play, if any.
    pub fn current_clue(&self) -> Option<&Clue> {
        self.current_clue.and_then(|id| self.board.get(&id))
    }

    /// Whether every regular (non-final) clue has left play.
    pub fn board_complete(&self) -> bool {
        self.board
            .values()
            .filter(|clue| !clue.final_round)
            .all(|clue| clue.state == ClueState::Spent)
    }

    /// The final-round clue, if the board has one.
    pub fn final_clue(&self) -> Option<&Clue> {
        self.board.values().find(|clue| clue.final_round)
    }
}

impl From<ParticipantSnapshot> for Participant {
    fn from(value: ParticipantSnapshot) -> Self {
        Self {
            user_id: value.user_id,
            display_name: value.display_name,
            score: value.score,
        }
    }
}

impl From<Participant> for ParticipantSnapshot {
    fn from(value: Participant) -> Self {
        Self {
            user_id: value.user_id,
            display_name: value.display_name,
            score: value.score,
        }
    }
}

impl From<ClueSnapshot> for Clue {
    fn from(value: ClueSnapshot) -> Self {
        Self {
            id: value.id,
            category: value.category,
            value: value.value,
            prompt: value.prompt,
            state: value.state,
            daily_double: value.daily_double,
            final_round: value.final_round,
            selected_by: value.selected_by,
            answer: value.answer,
        }
    }
}

impl From<Clue> for ClueSnapshot {
    fn from(value: Clue) -> Self {
        Self {
            id: value.id,
            category: value.category,
            value: value.value,
            prompt: value.prompt,
            state: value.state,
            daily_double: value.daily_double,
            final_round: value.final_round,
            selected_by: value.selected_by,
            answer: value.answer,
        }
    }
}

impl From<&SessionSnapshot> for GameSession {
    fn from(value: &SessionSnapshot) -> Self {
        Self {
            id: value.id,
            kind: value.kind,
            status: value.status,
            round: value.round,
            seq: value.seq,
            turn_player: value.turn_player,
            participants: value
                .participants
                .iter()
                .cloned()
                .map(|p| (p.user_id, p.into()))
                .collect(),
            board: value
                .board
                .iter()
                .cloned()
                .map(|c| (c.id, c.into()))
                .collect(),
            current_clue: value.current_clue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clue(final_round: bool, state: ClueState) -> Clue {
        Clue {
            id: Uuid::new_v4(),
            category: "History".into(),
            value: 400,
            prompt: String::new(),
            state,
            daily_double: false,
            final_round,
            selected_by: None,
            answer: None,
        }
    }

    #[test]
    fn board_complete_ignores_the_final_clue() {
        let spent = clue(false, ClueState::Spent);
        let final_clue = clue(true, ClueState::Hidden);
        let session = GameSession {
            id: Uuid::new_v4(),
            kind: GameKind::Jeopardy,
            status: SessionStatus::Active,
            round: 1,
            seq: 0,
            turn_player: None,
            participants: IndexMap::new(),
            board: [(spent.id, spent), (final_clue.id, final_clue)]
                .into_iter()
                .collect(),
            current_clue: None,
        };

        assert!(session.board_complete());
        assert!(session.final_clue().is_some());
    }

    #[test]
    fn board_with_hidden_regular_clue_is_not_complete() {
        let hidden = clue(false, ClueState::Hidden);
        let session = GameSession {
            id: Uuid::new_v4(),
            kind: GameKind::Jeopardy,
            status: SessionStatus::Active,
            round: 1,
            seq: 0,
            turn_player: None,
            participants: IndexMap::new(),
            board: [(hidden.id, hidden)].into_iter().collect(),
            current_clue: None,
        };

        assert!(!session.board_complete());
    }
}
