use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use crate::backend::{RpcEnvelope, RpcTransport};
use crate::dto::actions::{
    AnswerPayload, BuzzAck, BuzzPayload, PROC_FETCH_SNAPSHOT, PROC_RECORD_BUZZ, PROC_SELECT_CLUE,
    PROC_SKIP_CLUE, PROC_SUBMIT_ANSWER, PROC_SUBMIT_WAGER, SelectCluePayload, SkipCluePayload,
    SnapshotRequest, WagerPayload,
};
use crate::dto::snapshot::SessionSnapshot;
use crate::dto::validation::validate_wager;
use crate::error::ActionError;
use crate::state::phase_machine::{CluePhase, FinalPhase, GamePhase, PhaseEvent};
use crate::state::session::ClueState;
use crate::state::SharedState;

/// Translates player intents into single outbound procedure calls.
///
/// Every intent makes at most one network call; client-side guards
/// short-circuit duplicates and out-of-phase submissions before the wire.
/// Beyond optimistic hints (the local buzzer rank), no state is mutated
/// here: the authoritative update arrives as a subscription event.
pub struct ActionService {
    rpc: Arc<dyn RpcTransport>,
    state: SharedState,
    session_id: Uuid,
    min_wager: i64,
    board_max_clue_value: i64,
}

impl ActionService {
    /// Create a submitter bound to one session.
    pub fn new(
        rpc: Arc<dyn RpcTransport>,
        state: SharedState,
        session_id: Uuid,
        min_wager: i64,
        board_max_clue_value: i64,
    ) -> Self {
        Self {
            rpc,
            state,
            session_id,
            min_wager,
            board_max_clue_value,
        }
    }

    /// Reveal a clue as the turn holder.
    pub async fn select_clue(&self, clue_id: Uuid) -> Result<(), ActionError> {
        let me = self.state.my_user();

        if self.state.phase().await != GamePhase::Board {
            return Err(ActionError::Unavailable(
                "the board is not open for selection".into(),
            ));
        }

        let (turn_player, clue_selectable) = self
            .state
            .read_mirror(|mirror| {
                let selectable = mirror
                    .session()
                    .and_then(|session| session.board.get(&clue_id))
                    .map(|clue| clue.state == ClueState::Hidden && !clue.final_round)
                    .unwrap_or(false);
                (mirror.turn_player(), selectable)
            })
            .await;

        if turn_player != Some(me) {
            return Err(ActionError::NotYourTurn);
        }
        if !clue_selectable {
            return Err(ActionError::Unavailable("clue is not available".into()));
        }

        let envelope = self
            .call(
                PROC_SELECT_CLUE,
                &SelectCluePayload {
                    session_id: self.session_id,
                    clue_id,
                    player_id: me,
                },
            )
            .await?;
        if !envelope.success {
            return Err(ActionError::Rejected(envelope.error_message()));
        }

        // Phase advances when the reveal event comes back confirmed.
        Ok(())
    }

    /// Press the buzzer for the live clue. Returns the assigned rank.
    ///
    /// The rank from the acknowledgement is recorded optimistically so the
    /// UI reacts before the broadcast arrives; the broadcast then overwrites
    /// it if the two ever disagree.
    pub async fn buzz(&self) -> Result<u32, ActionError> {
        let me = self.state.my_user();

        let phase = self.state.phase().await;
        if !matches!(phase, GamePhase::Clue(CluePhase::BuzzersOpen { .. })) {
            return Err(ActionError::Unavailable("buzzers are not open".into()));
        }
        if phase.locked_out().contains(&me) {
            return Err(ActionError::LockedOut);
        }

        let clue_id = self
            .state
            .read_mirror(|mirror| mirror.current_clue().map(|clue| clue.id))
            .await
            .ok_or_else(|| ActionError::Unavailable("no clue is in play".into()))?;

        // One press per clue: reject both a duplicate press and a second
        // press racing the first one's acknowledgement.
        let already = self
            .state
            .with_mirror(|mirror| {
                if mirror.my_rank().is_some() || mirror.buzz_inflight() {
                    true
                } else {
                    mirror.set_buzz_inflight(true);
                    false
                }
            })
            .await;
        if already {
            return Err(ActionError::AlreadyBuzzed);
        }

        let outcome = self.buzz_call(me, clue_id).await;
        self.state
            .with_mirror(|mirror| {
                mirror.set_buzz_inflight(false);
            })
            .await;
        let ack = outcome?;

        self.state
            .with_mirror(|mirror| mirror.reconcile_my_rank(ack.rank, ack.seq))
            .await;

        if ack.rank == 1 {
            // First in line takes the floor immediately; if the broadcast got
            // here first the phase already moved and this is a no-op.
            if let Err(err) = self
                .state
                .apply_event(PhaseEvent::BuzzAccepted {
                    player: me,
                    rank: ack.rank,
                })
                .await
            {
                debug!(error = %err, "phase already advanced past the buzz acknowledgement");
            }
        }
        self.state.publish_render().await;

        Ok(ack.rank)
    }

    async fn buzz_call(&self, me: Uuid, clue_id: Uuid) -> Result<BuzzAck, ActionError> {
        let envelope = self
            .call(
                PROC_RECORD_BUZZ,
                &BuzzPayload {
                    session_id: self.session_id,
                    clue_id,
                    player_id: me,
                },
            )
            .await?;
        if !envelope.success {
            return Err(ActionError::Rejected(envelope.error_message()));
        }
        decode_value(envelope)
    }

    /// Submit an answer for judging; `None` records a timed-out non-answer.
    pub async fn submit_answer(&self, text: Option<String>) -> Result<(), ActionError> {
        let me = self.state.my_user();

        let clue_id = match self.state.phase().await {
            GamePhase::Clue(CluePhase::Answering { player, .. }) if player == me => self
                .state
                .read_mirror(|mirror| mirror.current_clue().map(|clue| clue.id))
                .await
                .ok_or_else(|| ActionError::Unavailable("no clue is in play".into()))?,
            GamePhase::Final(FinalPhase::Question) => self
                .state
                .read_mirror(|mirror| {
                    mirror
                        .session()
                        .and_then(|session| session.final_clue())
                        .map(|clue| clue.id)
                })
                .await
                .ok_or_else(|| ActionError::Unavailable("no final clue exists".into()))?,
            _ => {
                return Err(ActionError::Unavailable(
                    "it is not your turn to answer".into(),
                ));
            }
        };

        // Guard flips before the network call so a second submission racing
        // the first short-circuits locally.
        if self
            .state
            .with_mirror(|mirror| mirror.set_answer_submitted(true))
            .await
        {
            return Err(ActionError::AlreadySubmitted);
        }

        let payload = AnswerPayload {
            session_id: self.session_id,
            clue_id,
            player_id: me,
            text,
        };
        let outcome = async {
            payload.validate()?;
            let envelope = self.call(PROC_SUBMIT_ANSWER, &payload).await?;
            if !envelope.success {
                return Err(ActionError::Rejected(envelope.error_message()));
            }
            Ok(())
        }
        .await;

        if outcome.is_err() {
            // Rejection re-enables the control for a corrected resubmission.
            self.state
                .with_mirror(|mirror| {
                    mirror.set_answer_submitted(false);
                })
                .await;
        }
        self.state.publish_render().await;
        outcome
    }

    /// Lock in a daily-double or final-round wager.
    pub async fn submit_wager(&self, amount: i64) -> Result<(), ActionError> {
        let me = self.state.my_user();

        match self.state.phase().await {
            GamePhase::Clue(CluePhase::Wagering { player }) => {
                if player != me {
                    return Err(ActionError::Unavailable(
                        "only the selector wagers on a daily double".into(),
                    ));
                }

                let (score, clue_id) = self
                    .state
                    .read_mirror(|mirror| {
                        (
                            mirror.score_of(me).unwrap_or(0),
                            mirror.current_clue().map(|clue| clue.id),
                        )
                    })
                    .await;
                let clue_id = clue_id
                    .ok_or_else(|| ActionError::Unavailable("no clue is in play".into()))?;

                let min = self.min_wager;
                let max = score.max(self.board_max_clue_value);
                if validate_wager(amount, min, max).is_err() {
                    return Err(ActionError::WagerOutOfRange { min, max });
                }

                if self
                    .state
                    .with_mirror(|mirror| mirror.set_wager_submitted(true))
                    .await
                {
                    return Err(ActionError::AlreadySubmitted);
                }

                // Plan the wagering -> answering transition around the call:
                // acceptance applies it, a rejection aborts it and the phase
                // stays put for a corrected resubmission.
                let outcome = self
                    .state
                    .run_transition(PhaseEvent::WagerLocked, || async {
                        let envelope = self
                            .call(
                                PROC_SUBMIT_WAGER,
                                &WagerPayload {
                                    session_id: self.session_id,
                                    clue_id: Some(clue_id),
                                    player_id: me,
                                    amount,
                                },
                            )
                            .await?;
                        if !envelope.success {
                            return Err(ActionError::Rejected(envelope.error_message()));
                        }
                        Ok(())
                    })
                    .await;

                match outcome {
                    Ok(_) => {
                        self.state.publish_render().await;
                        Ok(())
                    }
                    Err(err) => {
                        self.state
                            .with_mirror(|mirror| {
                                mirror.set_wager_submitted(false);
                            })
                            .await;
                        self.state.publish_render().await;
                        Err(err)
                    }
                }
            }
            GamePhase::Final(FinalPhase::Wagering) => {
                let score = self
                    .state
                    .read_mirror(|mirror| mirror.score_of(me).unwrap_or(0))
                    .await;
                let min = 0;
                let max = score.max(0);
                if validate_wager(amount, min, max).is_err() {
                    return Err(ActionError::WagerOutOfRange { min, max });
                }

                if self
                    .state
                    .with_mirror(|mirror| mirror.set_wager_submitted(true))
                    .await
                {
                    return Err(ActionError::AlreadySubmitted);
                }

                let outcome = async {
                    let envelope = self
                        .call(
                            PROC_SUBMIT_WAGER,
                            &WagerPayload {
                                session_id: self.session_id,
                                clue_id: None,
                                player_id: me,
                                amount,
                            },
                        )
                        .await?;
                    if !envelope.success {
                        return Err(ActionError::Rejected(envelope.error_message()));
                    }
                    Ok(())
                }
                .await;

                if outcome.is_err() {
                    self.state
                        .with_mirror(|mirror| {
                            mirror.set_wager_submitted(false);
                        })
                        .await;
                }
                self.state.publish_render().await;
                outcome
            }
            _ => Err(ActionError::Unavailable("no wager is expected now".into())),
        }
    }

    /// Abandon the live clue without an answer.
    pub async fn skip_clue(&self) -> Result<(), ActionError> {
        let me = self.state.my_user();

        if !matches!(
            self.state.phase().await,
            GamePhase::Clue(CluePhase::BuzzersOpen { .. })
        ) {
            return Err(ActionError::Unavailable(
                "there is no clue to skip right now".into(),
            ));
        }

        let clue_id = self
            .state
            .read_mirror(|mirror| mirror.current_clue().map(|clue| clue.id))
            .await
            .ok_or_else(|| ActionError::Unavailable("no clue is in play".into()))?;

        let envelope = self
            .call(
                PROC_SKIP_CLUE,
                &SkipCluePayload {
                    session_id: self.session_id,
                    clue_id,
                    player_id: me,
                },
            )
            .await?;
        if !envelope.success {
            return Err(ActionError::Rejected(envelope.error_message()));
        }

        Ok(())
    }

    /// Fetch the authoritative session snapshot for a full resync.
    pub async fn fetch_snapshot(&self) -> Result<SessionSnapshot, ActionError> {
        let envelope = self
            .call(
                PROC_FETCH_SNAPSHOT,
                &SnapshotRequest {
                    session_id: self.session_id,
                },
            )
            .await?;
        if !envelope.success {
            return Err(ActionError::Rejected(envelope.error_message()));
        }
        decode_value(envelope)
    }

    async fn call<P: Serialize>(
        &self,
        procedure: &str,
        params: &P,
    ) -> Result<RpcEnvelope, ActionError> {
        let value = serde_json::to_value(params)
            .map_err(|err| ActionError::InvalidInput(err.to_string()))?;
        Ok(self.rpc.call(procedure, value).await?)
    }
}

fn decode_value<T: serde::de::DeserializeOwned>(envelope: RpcEnvelope) -> Result<T, ActionError> {
    let value = envelope
        .value
        .ok_or_else(|| ActionError::InvalidInput("procedure returned no value".into()))?;
    serde_json::from_value(value).map_err(|err| ActionError::InvalidInput(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::future::BoxFuture;
    use time::OffsetDateTime;

    use super::*;
    use crate::backend::transport::TransportResult;
    use crate::dto::snapshot::{ClueSnapshot, ParticipantSnapshot};
    use crate::state::ClientState;
    use crate::state::session::{GameKind, SessionStatus};

    /// RPC stub returning scripted envelopes and counting calls.
    struct ScriptedRpc {
        calls: AtomicU32,
        responses: Mutex<Vec<RpcEnvelope>>,
    }

    impl ScriptedRpc {
        fn new(responses: Vec<RpcEnvelope>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                responses: Mutex::new(responses),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RpcTransport for ScriptedRpc {
        fn call(
            &self,
            _procedure: &str,
            _params: serde_json::Value,
        ) -> BoxFuture<'static, TransportResult<RpcEnvelope>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .lock()
                .expect("responses lock")
                .pop()
                .unwrap_or(RpcEnvelope {
                    success: true,
                    value: None,
                    error: None,
                });
            Box::pin(async move { Ok(response) })
        }
    }

    fn accept() -> RpcEnvelope {
        RpcEnvelope {
            success: true,
            value: None,
            error: None,
        }
    }

    fn reject(reason: &str) -> RpcEnvelope {
        RpcEnvelope {
            success: false,
            value: None,
            error: Some(reason.into()),
        }
    }

    fn snapshot_with_clue(me: Uuid, clue_id: Uuid, score: i64, daily_double: bool) -> SessionSnapshot {
        SessionSnapshot {
            id: Uuid::new_v4(),
            kind: GameKind::Jeopardy,
            status: SessionStatus::Active,
            round: 1,
            seq: 1,
            turn_player: Some(me),
            updated_at: OffsetDateTime::now_utc(),
            participants: vec![ParticipantSnapshot {
                user_id: me,
                display_name: "me".into(),
                score,
            }],
            board: vec![ClueSnapshot {
                id: clue_id,
                category: "Science".into(),
                value: 400,
                prompt: "prompt".into(),
                state: ClueState::Revealed,
                daily_double,
                final_round: false,
                selected_by: Some(me),
                answer: None,
            }],
            current_clue: Some(clue_id),
            presses: vec![],
            locked_out: vec![],
            locked_wagers: vec![],
        }
    }

    async fn wagering_service(
        score: i64,
        responses: Vec<RpcEnvelope>,
    ) -> (Arc<ScriptedRpc>, SharedState, ActionService) {
        let me = Uuid::new_v4();
        let clue_id = Uuid::new_v4();
        let state = ClientState::new(me);
        let snapshot = snapshot_with_clue(me, clue_id, score, true);
        state
            .with_mirror(|mirror| mirror.apply_snapshot(&snapshot))
            .await;
        state
            .resync_phase(GamePhase::Clue(CluePhase::Wagering { player: me }))
            .await;

        let rpc = ScriptedRpc::new(responses);
        let service = ActionService::new(rpc.clone(), state.clone(), snapshot.id, 5, 2000);
        (rpc, state, service)
    }

    #[tokio::test]
    async fn out_of_range_wager_never_reaches_the_network() {
        let (rpc, _state, service) = wagering_service(600, vec![accept()]).await;

        let err = service.submit_wager(2001).await.unwrap_err();
        match err {
            ActionError::WagerOutOfRange { min, max } => {
                assert_eq!(min, 5);
                assert_eq!(max, 2000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(rpc.calls(), 0);
    }

    #[tokio::test]
    async fn high_score_raises_the_wager_ceiling() {
        let (rpc, _state, service) = wagering_service(5000, vec![accept()]).await;

        service.submit_wager(4500).await.expect("within score");
        assert_eq!(rpc.calls(), 1);
    }

    #[tokio::test]
    async fn server_rejection_leaves_phase_and_score_untouched() {
        let (rpc, state, service) = wagering_service(600, vec![reject("wager out of range")]).await;
        let me = state.my_user();

        let err = service.submit_wager(700).await.unwrap_err();
        assert!(matches!(err, ActionError::Rejected(_)));
        assert_eq!(rpc.calls(), 1);
        assert_eq!(
            state.phase().await,
            GamePhase::Clue(CluePhase::Wagering { player: me }),
            "a rejected wager never advances the phase"
        );
        assert_eq!(state.read_mirror(|m| m.score_of(me)).await, Some(600));
        assert!(!state.read_mirror(|m| m.wager_submitted()).await);
    }

    #[tokio::test]
    async fn accepted_wager_advances_to_answering() {
        let (_rpc, state, service) = wagering_service(600, vec![accept()]).await;
        let me = state.my_user();

        service.submit_wager(700).await.expect("accepted");
        assert_eq!(
            state.phase().await,
            GamePhase::Clue(CluePhase::Answering {
                player: me,
                rank: None,
                locked_out: vec![],
            })
        );
    }

    #[tokio::test]
    async fn duplicate_answer_submission_makes_one_network_call() {
        let me = Uuid::new_v4();
        let clue_id = Uuid::new_v4();
        let state = ClientState::new(me);
        let snapshot = snapshot_with_clue(me, clue_id, 0, false);
        state
            .with_mirror(|mirror| mirror.apply_snapshot(&snapshot))
            .await;
        state
            .resync_phase(GamePhase::Clue(CluePhase::Answering {
                player: me,
                rank: Some(1),
                locked_out: vec![],
            }))
            .await;

        let rpc = ScriptedRpc::new(vec![accept(), accept()]);
        let service = ActionService::new(rpc.clone(), state.clone(), snapshot.id, 5, 2000);

        service
            .submit_answer(Some("plasma".into()))
            .await
            .expect("first submission");
        let err = service
            .submit_answer(Some("plasma".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::AlreadySubmitted));
        assert_eq!(rpc.calls(), 1);
    }

    #[tokio::test]
    async fn buzz_outside_open_buzzers_is_guarded_locally() {
        let me = Uuid::new_v4();
        let state = ClientState::new(me);
        let rpc = ScriptedRpc::new(vec![]);
        let service = ActionService::new(rpc.clone(), state, Uuid::new_v4(), 5, 2000);

        let err = service.buzz().await.unwrap_err();
        assert!(matches!(err, ActionError::Unavailable(_)));
        assert_eq!(rpc.calls(), 0);
    }
}
