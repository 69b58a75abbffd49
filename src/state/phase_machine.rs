use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// High-level phases a game session can be in, as seen by this client.
///
/// Phase is a local derivation of authoritative server state, never a source
/// of truth: after a reconnect it is rebuilt from a fresh snapshot via
/// [`PhaseMachine::resync`], not resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GamePhase {
    /// Board is showing; the turn holder may pick a clue.
    Board,
    /// A clue is live and in one of the per-clue sub-phases.
    Clue(CluePhase),
    /// The terminal final-round path.
    Final(FinalPhase),
}

/// Fine-grained phase while a clue is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CluePhase {
    /// Daily double: the selector is choosing a wager; buzzers stay closed.
    Wagering {
        /// Player who revealed the clue and must answer it.
        player: Uuid,
    },
    /// Buzzers are open for everyone not locked out.
    BuzzersOpen {
        /// Players who already answered this clue incorrectly.
        locked_out: Vec<Uuid>,
    },
    /// One player holds the floor.
    Answering {
        /// Player answering.
        player: Uuid,
        /// The player's buzzer rank; `None` on a daily double.
        rank: Option<u32>,
        /// Players who already answered this clue incorrectly.
        locked_out: Vec<Uuid>,
    },
    /// The verdict for the last answer is showing.
    Feedback {
        /// Player whose answer was judged.
        player: Uuid,
        /// Whether the answer was correct.
        correct: bool,
        /// Players who already answered this clue incorrectly, including
        /// `player` when the verdict was wrong.
        locked_out: Vec<Uuid>,
    },
}

/// Phases of the final round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalPhase {
    /// All players are locking wagers.
    Wagering,
    /// The final clue is live; answers are being collected.
    Question,
    /// Results are showing; terminal.
    Results,
}

impl GamePhase {
    /// Players locked out of the current clue, when a clue is live.
    pub fn locked_out(&self) -> &[Uuid] {
        match self {
            GamePhase::Clue(CluePhase::BuzzersOpen { locked_out })
            | GamePhase::Clue(CluePhase::Answering { locked_out, .. })
            | GamePhase::Clue(CluePhase::Feedback { locked_out, .. }) => locked_out,
            _ => &[],
        }
    }
}

/// Events that can be applied to the phase machine.
///
/// Every event originates either from a server-confirmed change notification
/// or from the acknowledgement of this client's own submission; phase never
/// advances on an unacknowledged local guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// The turn holder revealed a clue.
    ClueSelected {
        /// Player who picked the clue.
        player: Uuid,
        /// Whether it is a daily double.
        daily_double: bool,
    },
    /// The daily-double wager was accepted; the selector answers.
    WagerLocked,
    /// A buzzer press won the floor.
    BuzzAccepted {
        /// Player who gets to answer.
        player: Uuid,
        /// The press's 1-based rank.
        rank: u32,
    },
    /// The server judged the floor holder's answer.
    AnswerJudged {
        /// Player whose answer was judged.
        player: Uuid,
        /// Whether the answer was correct.
        correct: bool,
    },
    /// Buzzers reopen after a wrong answer; the wrong answerer stays out.
    RebuzzOpened,
    /// All presses were discarded; the clue stays live with open buzzers.
    BuzzersCleared,
    /// The clue finished and left play.
    ClueFinished,
    /// The clue was abandoned without an answer.
    ClueSkipped,
    /// Every regular clue is spent; the final round begins.
    BoardCompleted,
    /// Every final wager is locked; the final clue is live.
    FinalWagersLocked,
    /// Final-round scoring finished.
    FinalScored,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: PhaseEvent,
}

/// Errors that can occur when planning a phase transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned phase transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// Phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when the plan was created.
        expected: GamePhase,
        /// Current phase.
        actual: GamePhase,
    },
    /// Version changed since the plan was created.
    VersionMismatch {
        /// Version expected after applying the plan.
        expected: usize,
        /// Version that would actually result.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned phase transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned phase transition.
pub type PlanId = Uuid;

/// A validated transition that has not yet been applied.
///
/// Submissions plan their transition before the remote call, apply it on an
/// accepted result, and abort it on a rejection, so a rejected action never
/// moves the phase.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the machine is currently in.
    pub from: GamePhase,
    /// Phase the machine will transition to.
    pub to: GamePhase,
    /// Event that triggered this transition.
    pub event: PhaseEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the machine's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSnapshot {
    /// Current phase.
    pub phase: GamePhase,
    /// Version number (increments on each transition).
    pub version: usize,
    /// Pending target phase, if a transition is planned but not applied.
    pub pending: Option<GamePhase>,
}

/// Client-side phase machine for one game session.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: GamePhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self {
            phase: GamePhase::Board,
            version: 0,
            pending: None,
        }
    }
}

impl PhaseMachine {
    /// Create a new machine showing the board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase.clone()
    }

    /// Create a snapshot of the current machine state.
    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            phase: self.phase.clone(),
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to.clone()),
        }
    }

    /// Replace the phase with one re-derived from a fresh authoritative
    /// snapshot, discarding any pending plan. Returns the new version.
    pub fn resync(&mut self, phase: GamePhase) -> usize {
        self.pending = None;
        self.phase = phase;
        self.version += 1;
        self.version
    }

    /// Plan a transition by validating that the event can be applied from the
    /// current phase. Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: PhaseEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event.clone())
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase.clone(),
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase.clone(),
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;
        self.pending = None;

        Ok(self.phase.clone())
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: PhaseEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self.phase.clone(), event) {
            (GamePhase::Board, PhaseEvent::ClueSelected { player, daily_double }) => {
                if daily_double {
                    GamePhase::Clue(CluePhase::Wagering { player })
                } else {
                    GamePhase::Clue(CluePhase::BuzzersOpen { locked_out: vec![] })
                }
            }
            (GamePhase::Clue(CluePhase::Wagering { player }), PhaseEvent::WagerLocked) => {
                // Daily double: the selector answers; the buzzer step is
                // skipped entirely.
                GamePhase::Clue(CluePhase::Answering {
                    player,
                    rank: None,
                    locked_out: vec![],
                })
            }
            (
                GamePhase::Clue(CluePhase::BuzzersOpen { locked_out }),
                PhaseEvent::BuzzAccepted { player, rank },
            ) => {
                if locked_out.contains(&player) {
                    return Err(InvalidTransition {
                        from: self.phase.clone(),
                        event: PhaseEvent::BuzzAccepted { player, rank },
                    });
                }
                GamePhase::Clue(CluePhase::Answering {
                    player,
                    rank: Some(rank),
                    locked_out,
                })
            }
            (
                GamePhase::Clue(CluePhase::Answering {
                    player, locked_out, ..
                }),
                PhaseEvent::AnswerJudged {
                    player: judged,
                    correct,
                },
            ) => {
                if judged != player {
                    return Err(InvalidTransition {
                        from: self.phase.clone(),
                        event: PhaseEvent::AnswerJudged {
                            player: judged,
                            correct,
                        },
                    });
                }
                let mut locked_out = locked_out;
                if !correct && !locked_out.contains(&player) {
                    locked_out.push(player);
                }
                GamePhase::Clue(CluePhase::Feedback {
                    player,
                    correct,
                    locked_out,
                })
            }
            (
                GamePhase::Clue(CluePhase::Feedback {
                    correct: false,
                    locked_out,
                    ..
                }),
                PhaseEvent::RebuzzOpened,
            ) => GamePhase::Clue(CluePhase::BuzzersOpen { locked_out }),
            (
                GamePhase::Clue(CluePhase::Answering { locked_out, .. }),
                PhaseEvent::BuzzersCleared,
            )
            | (
                GamePhase::Clue(CluePhase::BuzzersOpen { locked_out }),
                PhaseEvent::BuzzersCleared,
            ) => GamePhase::Clue(CluePhase::BuzzersOpen { locked_out }),
            (GamePhase::Clue(CluePhase::Feedback { .. }), PhaseEvent::ClueFinished) => {
                GamePhase::Board
            }
            (GamePhase::Clue(CluePhase::BuzzersOpen { .. }), PhaseEvent::ClueSkipped) => {
                GamePhase::Board
            }
            (GamePhase::Board, PhaseEvent::BoardCompleted) => GamePhase::Final(FinalPhase::Wagering),
            (GamePhase::Final(FinalPhase::Wagering), PhaseEvent::FinalWagersLocked) => {
                GamePhase::Final(FinalPhase::Question)
            }
            (GamePhase::Final(FinalPhase::Question), PhaseEvent::FinalScored) => {
                GamePhase::Final(FinalPhase::Results)
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut PhaseMachine, event: PhaseEvent) -> GamePhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_shows_the_board() {
        let sm = PhaseMachine::new();
        assert_eq!(sm.phase(), GamePhase::Board);
    }

    #[test]
    fn regular_clue_happy_path() {
        let mut sm = PhaseMachine::new();
        let selector = Uuid::new_v4();
        let buzzer = Uuid::new_v4();

        assert_eq!(
            apply(
                &mut sm,
                PhaseEvent::ClueSelected {
                    player: selector,
                    daily_double: false
                }
            ),
            GamePhase::Clue(CluePhase::BuzzersOpen { locked_out: vec![] })
        );
        assert_eq!(
            apply(
                &mut sm,
                PhaseEvent::BuzzAccepted {
                    player: buzzer,
                    rank: 1
                }
            ),
            GamePhase::Clue(CluePhase::Answering {
                player: buzzer,
                rank: Some(1),
                locked_out: vec![],
            })
        );
        assert_eq!(
            apply(
                &mut sm,
                PhaseEvent::AnswerJudged {
                    player: buzzer,
                    correct: true
                }
            ),
            GamePhase::Clue(CluePhase::Feedback {
                player: buzzer,
                correct: true,
                locked_out: vec![],
            })
        );
        assert_eq!(apply(&mut sm, PhaseEvent::ClueFinished), GamePhase::Board);
    }

    #[test]
    fn daily_double_skips_the_buzzer_step() {
        let mut sm = PhaseMachine::new();
        let selector = Uuid::new_v4();

        assert_eq!(
            apply(
                &mut sm,
                PhaseEvent::ClueSelected {
                    player: selector,
                    daily_double: true
                }
            ),
            GamePhase::Clue(CluePhase::Wagering { player: selector })
        );
        assert_eq!(
            apply(&mut sm, PhaseEvent::WagerLocked),
            GamePhase::Clue(CluePhase::Answering {
                player: selector,
                rank: None,
                locked_out: vec![],
            })
        );
    }

    #[test]
    fn wrong_answer_locks_the_player_out_of_the_rebuzz() {
        let mut sm = PhaseMachine::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        apply(
            &mut sm,
            PhaseEvent::ClueSelected {
                player: second,
                daily_double: false,
            },
        );
        apply(
            &mut sm,
            PhaseEvent::BuzzAccepted {
                player: first,
                rank: 1,
            },
        );
        apply(
            &mut sm,
            PhaseEvent::AnswerJudged {
                player: first,
                correct: false,
            },
        );

        assert_eq!(
            apply(&mut sm, PhaseEvent::RebuzzOpened),
            GamePhase::Clue(CluePhase::BuzzersOpen {
                locked_out: vec![first],
            })
        );

        // The wrong answerer is never re-admitted for this clue.
        let err = sm
            .plan(PhaseEvent::BuzzAccepted {
                player: first,
                rank: 2,
            })
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));

        // The next unlocked buzzer takes the floor.
        assert_eq!(
            apply(
                &mut sm,
                PhaseEvent::BuzzAccepted {
                    player: second,
                    rank: 2,
                }
            ),
            GamePhase::Clue(CluePhase::Answering {
                player: second,
                rank: Some(2),
                locked_out: vec![first],
            })
        );
    }

    #[test]
    fn judgement_for_the_wrong_player_is_rejected() {
        let mut sm = PhaseMachine::new();
        let answering = Uuid::new_v4();
        let other = Uuid::new_v4();

        apply(
            &mut sm,
            PhaseEvent::ClueSelected {
                player: other,
                daily_double: false,
            },
        );
        apply(
            &mut sm,
            PhaseEvent::BuzzAccepted {
                player: answering,
                rank: 1,
            },
        );

        let err = sm
            .plan(PhaseEvent::AnswerJudged {
                player: other,
                correct: true,
            })
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn final_round_path_is_terminal() {
        let mut sm = PhaseMachine::new();

        assert_eq!(
            apply(&mut sm, PhaseEvent::BoardCompleted),
            GamePhase::Final(FinalPhase::Wagering)
        );
        assert_eq!(
            apply(&mut sm, PhaseEvent::FinalWagersLocked),
            GamePhase::Final(FinalPhase::Question)
        );
        assert_eq!(
            apply(&mut sm, PhaseEvent::FinalScored),
            GamePhase::Final(FinalPhase::Results)
        );

        let err = sm.plan(PhaseEvent::BoardCompleted).unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = PhaseMachine::new();
        let err = sm.plan(PhaseEvent::WagerLocked).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, GamePhase::Board);
                assert_eq!(invalid.event, PhaseEvent::WagerLocked);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = PhaseMachine::new();
        let plan = sm
            .plan(PhaseEvent::ClueSelected {
                player: Uuid::new_v4(),
                daily_double: false,
            })
            .unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.snapshot().pending.is_none());
    }

    #[test]
    fn resync_discards_pending_and_bumps_version() {
        let mut sm = PhaseMachine::new();
        let before = sm.snapshot().version;
        sm.plan(PhaseEvent::BoardCompleted).unwrap();

        let version = sm.resync(GamePhase::Final(FinalPhase::Question));

        assert!(version > before);
        assert_eq!(sm.phase(), GamePhase::Final(FinalPhase::Question));
        assert!(sm.snapshot().pending.is_none());
    }
}
