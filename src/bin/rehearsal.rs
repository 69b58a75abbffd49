//! Scripted rehearsal of a full game against the in-process backend.
//!
//! One seat is driven through the coordinator the way a UI would drive it;
//! the other player acts through direct procedure calls, standing in for
//! their own client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::time::timeout;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use podium_client::backend::RpcTransport;
use podium_client::backend::memory::{ClueSeed, MemoryBackend, SessionSeed};
use podium_client::config::ClientConfig;
use podium_client::coordinator::Coordinator;
use podium_client::dto::actions::{
    AnswerPayload, BuzzPayload, PROC_RECORD_BUZZ, PROC_SUBMIT_ANSWER, PROC_SUBMIT_WAGER,
    WagerPayload,
};
use podium_client::dto::phase::PhaseKind;
use podium_client::dto::render::RenderSnapshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let session_id = Uuid::new_v4();
    let ada = Uuid::new_v4();
    let grace = Uuid::new_v4();

    let science = ClueSeed {
        id: Uuid::new_v4(),
        category: "Science".into(),
        value: 400,
        prompt: "This fourth state of matter conducts electricity".into(),
        answer: "plasma".into(),
        daily_double: false,
        final_round: false,
    };
    let history = ClueSeed {
        id: Uuid::new_v4(),
        category: "History".into(),
        value: 800,
        prompt: "She wrote the first published algorithm".into(),
        answer: "ada lovelace".into(),
        daily_double: true,
        final_round: false,
    };
    let final_clue = ClueSeed {
        id: Uuid::new_v4(),
        category: "Mathematics".into(),
        value: 0,
        prompt: "This measure of disorder never decreases in a closed system".into(),
        answer: "entropy".into(),
        daily_double: false,
        final_round: true,
    };

    let backend = Arc::new(MemoryBackend::new(SessionSeed {
        session_id,
        participants: vec![(ada, "Ada".into()), (grace, "Grace".into())],
        clues: vec![science.clone(), history.clone(), final_clue.clone()],
        turn_player: ada,
        min_wager: 5,
        board_max_clue_value: 2000,
    }));

    let coordinator = Coordinator::new(
        backend.clone(),
        backend.clone(),
        ClientConfig::default(),
        session_id,
        ada,
    );

    // Narrate every phase change the way a UI would repaint on one.
    let mut narration = coordinator.render_watcher();
    tokio::spawn(async move {
        let mut last = PhaseKind::Board;
        while narration.changed().await.is_ok() {
            let phase = narration.borrow_and_update().phase;
            if phase != last {
                info!(phase = ?phase, "phase changed");
                last = phase;
            }
        }
    });

    coordinator.connect().await.context("connecting")?;
    info!("connected; Ada holds the board");

    // Round 1: a regular clue. Grace out-buzzes Ada but misses; Ada converts
    // the rebuzz.
    coordinator
        .select_clue(science.id)
        .await
        .context("selecting clue")?;
    wait_until(&coordinator, "buzzers open", |snapshot| {
        snapshot.phase == PhaseKind::BuzzerWait
    })
    .await?;

    rpc(
        &*backend,
        PROC_RECORD_BUZZ,
        &BuzzPayload {
            session_id,
            clue_id: science.id,
            player_id: grace,
        },
    )
    .await?;
    rpc(
        &*backend,
        PROC_SUBMIT_ANSWER,
        &AnswerPayload {
            session_id,
            clue_id: science.id,
            player_id: grace,
            text: Some("dark matter".into()),
        },
    )
    .await?;
    wait_until(&coordinator, "rebuzz window", |snapshot| {
        snapshot.phase == PhaseKind::BuzzerWait
            && snapshot.scoreboard.iter().any(|line| line.score < 0)
    })
    .await?;

    let rank = coordinator.buzz().await.context("buzzing")?;
    info!(rank, "Ada buzzed");
    wait_until(&coordinator, "Ada answering", |snapshot| {
        snapshot.answering_player == Some(ada)
    })
    .await?;
    coordinator
        .submit_answer(Some("plasma".into()))
        .await
        .context("answering")?;
    wait_until(&coordinator, "back to the board", |snapshot| {
        snapshot.phase == PhaseKind::Board
    })
    .await?;

    // Round 2: Ada finds the daily double and bets beyond her score.
    coordinator
        .select_clue(history.id)
        .await
        .context("selecting daily double")?;
    wait_until(&coordinator, "daily double wager", |snapshot| {
        snapshot.phase == PhaseKind::DailyDoubleWager
    })
    .await?;
    coordinator.submit_wager(1000).await.context("wagering")?;
    wait_until(&coordinator, "Ada answering the daily double", |snapshot| {
        snapshot.answering_player == Some(ada)
    })
    .await?;
    coordinator
        .submit_answer(Some("Ada Lovelace".into()))
        .await
        .context("answering the daily double")?;

    // The board is spent, so the final round opens.
    wait_until(&coordinator, "final wagers", |snapshot| {
        snapshot.phase == PhaseKind::FinalWager
    })
    .await?;
    coordinator.submit_wager(700).await.context("final wager")?;
    rpc(
        &*backend,
        PROC_SUBMIT_WAGER,
        &WagerPayload {
            session_id,
            clue_id: None,
            player_id: grace,
            amount: 0,
        },
    )
    .await?;
    wait_until(&coordinator, "final question", |snapshot| {
        snapshot.phase == PhaseKind::FinalQuestion
    })
    .await?;

    coordinator
        .submit_answer(Some("entropy".into()))
        .await
        .context("final answer")?;
    rpc(
        &*backend,
        PROC_SUBMIT_ANSWER,
        &AnswerPayload {
            session_id,
            clue_id: final_clue.id,
            player_id: grace,
            text: None,
        },
    )
    .await?;
    wait_until(&coordinator, "final results", |snapshot| {
        snapshot.phase == PhaseKind::FinalResults
    })
    .await?;

    let watcher = coordinator.render_watcher();
    let standings = watcher.borrow().scoreboard.clone();
    for line in standings {
        info!(player = %line.display_name, score = line.score, "final standing");
    }

    coordinator.dispose().await;
    Ok(())
}

/// Issue a procedure call for the scripted seat and fail loudly on a
/// rejection.
async fn rpc<P: serde::Serialize>(
    backend: &MemoryBackend,
    procedure: &str,
    params: &P,
) -> anyhow::Result<()> {
    let envelope = backend
        .call(procedure, serde_json::to_value(params)?)
        .await
        .context("in-process call")?;
    if !envelope.success {
        bail!("{procedure} rejected: {}", envelope.error_message());
    }
    Ok(())
}

/// Block until a render snapshot satisfies the predicate.
async fn wait_until<F>(
    coordinator: &Coordinator,
    what: &str,
    predicate: F,
) -> anyhow::Result<()>
where
    F: Fn(&RenderSnapshot) -> bool,
{
    let mut watcher = coordinator.render_watcher();
    let outcome = timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&watcher.borrow_and_update()) {
                return;
            }
            if watcher.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    if outcome.is_err() {
        bail!("timed out waiting for {what}");
    }
    Ok(())
}

/// Configure tracing subscribers so the rehearsal narrates itself.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,podium_client=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
