//! End-to-end flows through the runtime: sessions, admin precedence, the
//! color draw and late cash-outs.

use chrono::{Duration, Utc};
use roundcore::games::color::{Color, ColorSelection, ColorWager};
use roundcore::games::GameOutcome;
use roundcore::sessions::Reveal;
use roundcore::tables::TickOutcome;
use roundcore::{
    BetStatus, EngineConfig, EngineError, GameKind, GameRuntime, Multiplier, RoundOutcome,
    RoundStatus,
};

fn runtime_with_users(users: &[&str]) -> GameRuntime {
    let runtime = GameRuntime::new(EngineConfig::default());
    for user in users {
        runtime.open_account(user, 1_000).unwrap();
    }
    runtime
}

async fn fly_to_crash(runtime: &GameRuntime) {
    loop {
        match runtime.aviator().tick().await {
            TickOutcome::Climbing(_) => continue,
            TickOutcome::Crashed { .. } => return,
            TickOutcome::Idle => panic!("no round in flight"),
        }
    }
}

#[tokio::test]
async fn test_new_session_force_settles_abandoned_one() {
    let runtime = runtime_with_users(&["alice"]);
    let game: GameKind = "chicken".parse().unwrap();

    let abandoned = runtime.start_session("alice", game, 100).await.unwrap();
    let fresh = runtime.start_session("alice", game, 50).await.unwrap();

    let history = runtime.get_user_bets("alice", None, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].bet_id, abandoned.id);
    assert_eq!(history[0].payout_amount, 0);
    assert_eq!(history[0].result, GameOutcome::Loss);

    assert_eq!(runtime.current_session("alice", game).await.unwrap().id, fresh.id);
    assert_eq!(runtime.balance("alice").unwrap(), 850);
}

#[tokio::test]
async fn test_unknown_game_is_a_validation_error() {
    assert!(matches!(
        "roulette".parse::<GameKind>(),
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_admin_outcome_takes_precedence() {
    let runtime = runtime_with_users(&["alice"]);
    let now = Utc::now();

    runtime
        .schedule_round(
            GameKind::Aviator,
            RoundOutcome::CrashPoint(Multiplier(180)),
            now - Duration::minutes(10),
            now + Duration::minutes(10),
        )
        .await
        .unwrap();
    let newer = runtime
        .schedule_round(
            GameKind::Aviator,
            RoundOutcome::CrashPoint(Multiplier(250)),
            now - Duration::minutes(1),
            now + Duration::minutes(10),
        )
        .await
        .unwrap();

    let round = runtime.create_round(GameKind::Aviator, None).await.unwrap();
    assert_eq!(round.outcome, RoundOutcome::CrashPoint(Multiplier(250)));
    assert_eq!(round.borrowed_from.as_deref(), Some(newer.id.as_str()));

    let chicken_steps = vec![Multiplier(100), Multiplier(140), Multiplier::ZERO];
    let admin_chicken = runtime
        .schedule_round(
            GameKind::Chicken,
            RoundOutcome::Steps(chicken_steps.clone()),
            now - Duration::minutes(1),
            now + Duration::minutes(10),
        )
        .await
        .unwrap();
    let session = runtime.start_session("alice", GameKind::Chicken, 100).await.unwrap();
    assert_eq!(session.round_id.as_deref(), Some(admin_chicken.id.as_str()));

    // The session keeps its snapshot even after the admin round disappears.
    runtime.delete_scheduled_round(&admin_chicken.id).await.unwrap();
    let first = runtime.advance("alice", GameKind::Chicken).await.unwrap();
    assert_eq!(first.reveal, Reveal::Multiplier(chicken_steps[0]));
    let second = runtime.advance("alice", GameKind::Chicken).await.unwrap();
    assert_eq!(second.reveal, Reveal::Multiplier(chicken_steps[1]));
    let bust = runtime.advance("alice", GameKind::Chicken).await.unwrap();
    assert!(bust.busted);
}

#[tokio::test]
async fn test_color_violet_on_zero_pays_45() {
    let runtime = runtime_with_users(&["alice"]);
    let round = runtime
        .create_round(GameKind::Color, Some(RoundOutcome::Number(0)))
        .await
        .unwrap();

    runtime
        .place_color_bet(
            "alice",
            10,
            ColorWager {
                selection: ColorSelection::Color(Color::Violet),
                multiplier: 1,
            },
        )
        .await
        .unwrap();
    let summary = runtime.color().finish_now().await.unwrap();
    assert_eq!(summary.paid_out, 45);
    assert_eq!(runtime.balance("alice").unwrap(), 1_035);

    let bets = runtime.get_user_bets("alice", Some(GameKind::Color), None).await.unwrap();
    assert_eq!(bets.len(), 1);
    assert_eq!(bets[0].payout_amount, 45);

    let history = runtime.get_game_history(GameKind::Color, None).await.unwrap();
    assert_eq!(history[0].id, round.id);
    assert_eq!(history[0].status, RoundStatus::Completed);
}

#[tokio::test]
async fn test_late_cash_out_is_refused_without_wallet_change() {
    let runtime = runtime_with_users(&["alice", "bob"]);
    runtime
        .create_round(GameKind::Aviator, Some(RoundOutcome::CrashPoint(Multiplier(130))))
        .await
        .unwrap();
    runtime.place_bet("alice", 100).await.unwrap();
    runtime.place_bet("bob", 100).await.unwrap();

    runtime.aviator().tick().await;
    let early = runtime.cash_out("bob").await.unwrap();
    assert_eq!(early.payout, 105);

    fly_to_crash(&runtime).await;
    let entries_before = runtime.wallet_entries("alice").unwrap().len();

    let late = runtime.cash_out("alice").await.unwrap_err();
    assert!(matches!(late, EngineError::BetAlreadySettled(_)));
    assert_eq!(runtime.wallet_entries("alice").unwrap().len(), entries_before);
    assert_eq!(runtime.balance("alice").unwrap(), 900);
    assert_eq!(runtime.balance("bob").unwrap(), 1_005);

    let live = runtime.get_live_bets().await;
    assert_eq!(live.len(), 2);
    let current = runtime.get_current_round(GameKind::Aviator).await.unwrap().unwrap();
    assert_eq!(current.crash_point, Some(Multiplier(130)));
}

#[tokio::test]
async fn test_admin_round_lifecycle_through_the_sweep() {
    let runtime = runtime_with_users(&["alice"]);
    let now = Utc::now();
    let round = runtime
        .schedule_round(
            GameKind::Mining,
            RoundOutcome::Tiles((1..=24).rev().collect()),
            now - Duration::seconds(1),
            now + Duration::seconds(30),
        )
        .await
        .unwrap();
    let session = runtime.start_session("alice", GameKind::Mining, 40).await.unwrap();
    let step = runtime.advance("alice", GameKind::Mining).await.unwrap();
    assert_eq!(step.reveal, Reveal::Tile(24));

    let scheduler = runtime.scheduler();
    assert_eq!(scheduler.activate_due_rounds(now).await.unwrap().len(), 1);
    let current = runtime.get_current_round(GameKind::Mining).await.unwrap().unwrap();
    assert_eq!(current.round_id, round.id);

    let completed = scheduler
        .complete_expired_rounds(now + Duration::seconds(31))
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);

    let record = runtime.get_user_bets("alice", Some(GameKind::Mining), Some(10)).await.unwrap();
    assert_eq!(record[0].bet_id, session.id);
    assert_eq!(record[0].result, GameOutcome::Loss);
    assert!(runtime.current_session("alice", GameKind::Mining).await.is_none());
    assert!(matches!(
        runtime.delete_scheduled_round(&round.id).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_collect_settles_won() {
    let runtime = runtime_with_users(&["alice"]);
    let now = Utc::now();
    runtime
        .schedule_round(
            GameKind::Chicken,
            RoundOutcome::Steps(vec![Multiplier(100), Multiplier(140), Multiplier(180), Multiplier::ZERO]),
            now - Duration::seconds(1),
            now + Duration::seconds(60),
        )
        .await
        .unwrap();
    runtime.start_session("alice", GameKind::Chicken, 100).await.unwrap();
    for _ in 0..3 {
        runtime.advance("alice", GameKind::Chicken).await.unwrap();
    }
    let bet = runtime.collect("alice", GameKind::Chicken).await.unwrap();
    assert_eq!(bet.status, BetStatus::Won);
    assert_eq!(bet.payout, 180);
    assert_eq!(runtime.balance("alice").unwrap(), 1_080);
}
