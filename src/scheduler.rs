//! Round scheduler
//!
//! Owns the round state machine: admin intake, engine round creation with
//! admin-outcome precedence, and the periodic sweep that activates due rounds,
//! expires stale ones and completes rounds whose window has closed.

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::events::{EventBus, GameEvent};
use crate::games::{GameFamily, GameKind, MultiplierEngine, Round, RoundOrigin, RoundOutcome, RoundStatus};
use crate::settlement::{SettlementEngine, SweepSummary};
use crate::storage::RoundStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct RoundScheduler {
    config: EngineConfig,
    engine: MultiplierEngine,
    rounds: Arc<dyn RoundStore>,
    settlement: Arc<SettlementEngine>,
    events: EventBus,
}

impl RoundScheduler {
    pub fn new(
        config: EngineConfig,
        rounds: Arc<dyn RoundStore>,
        settlement: Arc<SettlementEngine>,
        events: EventBus,
    ) -> Self {
        let engine = MultiplierEngine::new(config.aviator.clone(), config.stepped.clone());
        Self {
            config,
            engine,
            rounds,
            settlement,
            events,
        }
    }

    /// Admin intake: store a round that activates when its window opens
    pub async fn schedule_round(
        &self,
        game: GameKind,
        outcome: RoundOutcome,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> EngineResult<Round> {
        if start_time >= end_time {
            return Err(EngineError::validation(format!(
                "round window is empty: start {} is not before end {}",
                start_time, end_time
            )));
        }
        self.engine
            .validate_outcome(game, &outcome)
            .map_err(EngineError::Validation)?;

        let round = Round::scheduled(game, outcome, start_time, end_time);
        self.rounds.insert(round.clone()).await?;
        info!(round_id = %round.id, %game, start = %start_time, end = %end_time, "round scheduled");
        Ok(round)
    }

    /// Admin deletion; only rounds that have not started may go
    pub async fn delete_scheduled_round(&self, round_id: &str) -> EngineResult<Round> {
        let round = self.rounds.delete_scheduled(round_id).await?;
        info!(round_id, game = %round.game, "scheduled round deleted");
        Ok(round)
    }

    /// Outcome for a new round or session of `game` at `now`: the covering
    /// admin round wins, otherwise the engine generates one.
    pub async fn resolve_outcome(
        &self,
        game: GameKind,
        now: DateTime<Utc>,
    ) -> EngineResult<(RoundOutcome, Option<Round>)> {
        if let Some(admin) = self.rounds.covering(game, now).await? {
            debug!(round_id = %admin.id, %game, "using admin outcome");
            return Ok((admin.outcome.clone(), Some(admin)));
        }
        let outcome = self.engine.fallback_outcome(game, &mut rand::thread_rng());
        Ok((outcome, None))
    }

    /// Create a live engine round of `game` starting at `now`
    pub async fn create_round(
        &self,
        game: GameKind,
        explicit_outcome: Option<RoundOutcome>,
        now: DateTime<Utc>,
    ) -> EngineResult<Round> {
        if game.family() == GameFamily::Stepped {
            return Err(EngineError::validation(format!(
                "{} is played in sessions, not live rounds",
                game
            )));
        }

        let (outcome, borrowed_from) = match explicit_outcome {
            Some(outcome) => {
                self.engine
                    .validate_outcome(game, &outcome)
                    .map_err(EngineError::Validation)?;
                (outcome, None)
            }
            None => {
                let (outcome, admin) = self.resolve_outcome(game, now).await?;
                (outcome, admin.map(|r| r.id))
            }
        };

        let length = match outcome.crash_point() {
            Some(crash_point) => self.engine.flight_duration(crash_point),
            None => self.config.color.round_duration(),
        };
        let end_time = now + to_chrono(length)?;

        let round = Round::live(game, outcome, now, end_time, borrowed_from);
        self.rounds.insert(round.clone()).await?;
        info!(
            round_id = %round.id,
            %game,
            borrowed_from = ?round.borrowed_from,
            end = %round.end_time,
            "round created"
        );
        Ok(round)
    }

    /// Close a live round and settle whatever is still open on it. `None`
    /// when the round was no longer active.
    pub async fn complete_round(&self, round: &Round) -> EngineResult<Option<SweepSummary>> {
        if !self
            .rounds
            .transition(&round.id, RoundStatus::Active, RoundStatus::Completed)
            .await?
        {
            return Ok(None);
        }
        let summary = self.settlement.settle_round(round).await;
        info!(round_id = %round.id, game = %round.game, "round completed");
        Ok(Some(summary))
    }

    /// Complete a table's round and sweep it. The sweep runs even when the
    /// round was already closed or the status write failed, so no bet is
    /// left open behind a finished round.
    pub async fn close_round(&self, round: &Round) -> SweepSummary {
        match self.complete_round(round).await {
            Ok(Some(summary)) => summary,
            Ok(None) => {
                warn!(round_id = %round.id, game = %round.game, "round was already closed; sweeping anyway");
                self.settlement.settle_round(round).await
            }
            Err(e) => {
                error!(round_id = %round.id, game = %round.game, "failed to complete round: {}", e);
                self.settlement.settle_round(round).await
            }
        }
    }

    /// Move due admin rounds to `active` and stale ones to `expired`
    pub async fn activate_due_rounds(&self, now: DateTime<Utc>) -> EngineResult<Vec<Round>> {
        let mut activated = Vec::new();

        for round in self.rounds.with_status(RoundStatus::Scheduled).await? {
            if round.end_time <= now {
                if self
                    .rounds
                    .transition(&round.id, RoundStatus::Scheduled, RoundStatus::Expired)
                    .await?
                {
                    warn!(round_id = %round.id, game = %round.game, "scheduled round expired before activation");
                }
                continue;
            }
            if round.start_time > now {
                continue;
            }
            if !self
                .rounds
                .transition(&round.id, RoundStatus::Scheduled, RoundStatus::Active)
                .await?
            {
                continue;
            }

            info!(round_id = %round.id, game = %round.game, "round activated");
            if self.rounds.mark_message_sent(&round.id).await? {
                self.events.publish(GameEvent::RoundActivated {
                    round_id: round.id.clone(),
                    game: round.game,
                    start_time: round.start_time,
                    end_time: round.end_time,
                });
            }
            activated.push(Round {
                status: RoundStatus::Active,
                message_sent: true,
                ..round
            });
        }

        Ok(activated)
    }

    /// Complete admin rounds whose window has closed. Engine rounds are
    /// completed by the table that runs them.
    pub async fn complete_expired_rounds(&self, now: DateTime<Utc>) -> EngineResult<Vec<Round>> {
        let mut completed = Vec::new();
        for round in self.rounds.with_status(RoundStatus::Active).await? {
            if round.origin != RoundOrigin::Admin || round.end_time > now {
                continue;
            }
            if self.complete_round(&round).await?.is_some() {
                completed.push(Round {
                    status: RoundStatus::Completed,
                    ..round
                });
            }
        }
        Ok(completed)
    }

    pub async fn get_round(&self, round_id: &str) -> EngineResult<Round> {
        self.rounds
            .get(round_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("round {}", round_id)))
    }

    pub async fn list_rounds(
        &self,
        game: Option<GameKind>,
        status: Option<RoundStatus>,
    ) -> EngineResult<Vec<Round>> {
        self.rounds.list(game, status).await
    }

    /// Admin round of `game` covering `now`, if any
    pub async fn covering_round(&self, game: GameKind, now: DateTime<Utc>) -> EngineResult<Option<Round>> {
        self.rounds.covering(game, now).await
    }

    pub async fn game_history(&self, game: GameKind, limit: Option<usize>) -> EngineResult<Vec<Round>> {
        let limit = limit.unwrap_or(self.config.scheduler.history_limit);
        self.rounds.completed(game, limit).await
    }

    /// Periodic activation/completion sweep until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.scheduler.activation_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("activation sweep started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let now = Utc::now();
            if let Err(e) = self.activate_due_rounds(now).await {
                error!("activation sweep failed: {}", e);
            }
            if let Err(e) = self.complete_expired_rounds(now).await {
                error!("completion sweep failed: {}", e);
            }
        }

        info!("activation sweep stopped");
    }
}

fn to_chrono(duration: Duration) -> EngineResult<ChronoDuration> {
    ChronoDuration::from_std(duration)
        .map_err(|e| EngineError::internal(format!("round length out of range: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{Bet, Multiplier, Wager};
    use crate::ledger::BetLedger;
    use crate::storage::{HistoryStore, InMemoryHistoryStore, InMemoryRoundStore};
    use crate::wallet::WalletLedger;

    struct Fixture {
        scheduler: RoundScheduler,
        rounds: Arc<InMemoryRoundStore>,
        ledger: Arc<BetLedger>,
        history: Arc<InMemoryHistoryStore>,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        let rounds = Arc::new(InMemoryRoundStore::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let ledger = Arc::new(BetLedger::new());
        let settlement = Arc::new(SettlementEngine::new(
            Arc::new(WalletLedger::new()),
            Arc::clone(&ledger),
            history.clone() as Arc<dyn HistoryStore>,
        ));
        let events = EventBus::new(64);
        let scheduler = RoundScheduler::new(
            EngineConfig::default(),
            rounds.clone() as Arc<dyn RoundStore>,
            settlement,
            events.clone(),
        );
        Fixture {
            scheduler,
            rounds,
            ledger,
            history,
            events,
        }
    }

    fn secs(n: i64) -> ChronoDuration {
        ChronoDuration::seconds(n)
    }

    #[tokio::test]
    async fn test_schedule_round_validation() {
        let f = fixture();
        let now = Utc::now();

        let empty_window = f
            .scheduler
            .schedule_round(GameKind::Aviator, RoundOutcome::CrashPoint(Multiplier(200)), now, now)
            .await;
        assert!(matches!(empty_window, Err(EngineError::Validation(_))));

        let wrong_shape = f
            .scheduler
            .schedule_round(GameKind::Aviator, RoundOutcome::Number(3), now, now + secs(10))
            .await;
        assert!(matches!(wrong_shape, Err(EngineError::Validation(_))));

        let low_crash = f
            .scheduler
            .schedule_round(GameKind::Aviator, RoundOutcome::CrashPoint(Multiplier(100)), now, now + secs(10))
            .await;
        assert!(matches!(low_crash, Err(EngineError::Validation(_))));

        let ok = f
            .scheduler
            .schedule_round(GameKind::Color, RoundOutcome::Number(7), now, now + secs(10))
            .await
            .unwrap();
        assert_eq!(ok.status, RoundStatus::Scheduled);
        assert_eq!(ok.origin, RoundOrigin::Admin);
    }

    #[tokio::test]
    async fn test_activation_is_idempotent_and_announced_once() {
        let f = fixture();
        let mut rx = f.events.subscribe();
        let now = Utc::now();
        let round = f
            .scheduler
            .schedule_round(GameKind::Aviator, RoundOutcome::CrashPoint(Multiplier(300)), now - secs(1), now + secs(30))
            .await
            .unwrap();

        let first = f.scheduler.activate_due_rounds(now).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(f.scheduler.activate_due_rounds(now).await.unwrap().is_empty());

        match rx.try_recv().unwrap() {
            GameEvent::RoundActivated { round_id, .. } => assert_eq!(round_id, round.id),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(
            f.rounds.get(&round.id).await.unwrap().unwrap().status,
            RoundStatus::Active
        );
    }

    #[tokio::test]
    async fn test_future_and_stale_rounds() {
        let f = fixture();
        let now = Utc::now();
        let future = f
            .scheduler
            .schedule_round(GameKind::Color, RoundOutcome::Number(1), now + secs(60), now + secs(120))
            .await
            .unwrap();
        let stale = f
            .scheduler
            .schedule_round(GameKind::Color, RoundOutcome::Number(2), now - secs(120), now - secs(60))
            .await
            .unwrap();

        assert!(f.scheduler.activate_due_rounds(now).await.unwrap().is_empty());
        assert_eq!(f.rounds.get(&future.id).await.unwrap().unwrap().status, RoundStatus::Scheduled);
        assert_eq!(f.rounds.get(&stale.id).await.unwrap().unwrap().status, RoundStatus::Expired);
    }

    #[tokio::test]
    async fn test_completion_settles_open_sessions_as_loss() {
        let f = fixture();
        let now = Utc::now();
        let round = f
            .scheduler
            .schedule_round(
                GameKind::Chicken,
                RoundOutcome::Steps(vec![Multiplier(100), Multiplier(140), Multiplier::ZERO]),
                now - secs(10),
                now + secs(10),
            )
            .await
            .unwrap();
        f.scheduler.activate_due_rounds(now).await.unwrap();

        let bet = Bet::new(
            "u1".into(),
            GameKind::Chicken,
            Some(round.id.clone()),
            20,
            Wager::Steps {
                outcome: round.outcome.clone(),
                current_step_index: 1,
            },
        );
        let bet_id = bet.id.clone();
        f.ledger.open_bet(bet).unwrap();

        assert!(f.scheduler.complete_expired_rounds(now).await.unwrap().is_empty());
        let done = f.scheduler.complete_expired_rounds(now + secs(11)).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, RoundStatus::Completed);

        let record = f.history.for_bet(&bet_id).await.unwrap().unwrap();
        assert_eq!(record.payout_amount, 0);
        assert!(f.ledger.open_bet_id("u1", GameKind::Chicken).is_none());
        assert_eq!(f.ledger.bet_count(), 0);
        assert_eq!(f.ledger.round_count(), 0);

        let history = f.scheduler.game_history(GameKind::Chicken, None).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_close_round_sweeps_even_when_already_completed() {
        let f = fixture();
        let round = f
            .scheduler
            .create_round(GameKind::Aviator, Some(RoundOutcome::CrashPoint(Multiplier(150))), Utc::now())
            .await
            .unwrap();
        let bet = Bet::new(
            "u1".into(),
            GameKind::Aviator,
            Some(round.id.clone()),
            20,
            Wager::Crash {
                cash_out_multiplier: None,
            },
        );
        let bet_id = bet.id.clone();
        f.rounds
            .transition(&round.id, RoundStatus::Active, RoundStatus::Completed)
            .await
            .unwrap();
        f.ledger.open_bet(bet).unwrap();

        let summary = f.scheduler.close_round(&round).await;
        assert_eq!(summary.settled, 1);
        assert!(f.history.for_bet(&bet_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_engine_round_borrows_admin_outcome() {
        let f = fixture();
        let now = Utc::now();
        let admin = f
            .scheduler
            .schedule_round(GameKind::Aviator, RoundOutcome::CrashPoint(Multiplier(250)), now - secs(5), now + secs(60))
            .await
            .unwrap();

        let live = f.scheduler.create_round(GameKind::Aviator, None, now).await.unwrap();
        assert_eq!(live.outcome, RoundOutcome::CrashPoint(Multiplier(250)));
        assert_eq!(live.borrowed_from.as_deref(), Some(admin.id.as_str()));
        assert_eq!(live.origin, RoundOrigin::Engine);
        assert_eq!(live.end_time - live.start_time, ChronoDuration::milliseconds(6000));

        // Engine rounds are left alone by the admin completion sweep
        let done = f.scheduler.complete_expired_rounds(now + secs(30)).await.unwrap();
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn test_create_round_without_admin_uses_fallback() {
        let f = fixture();
        let round = f.scheduler.create_round(GameKind::Color, None, Utc::now()).await.unwrap();
        assert!(round.borrowed_from.is_none());
        assert!(matches!(round.outcome, RoundOutcome::Number(n) if n <= 9));
        assert_eq!(round.end_time - round.start_time, secs(60));

        let stepped = f.scheduler.create_round(GameKind::Mining, None, Utc::now()).await;
        assert!(matches!(stepped, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_only_scheduled() {
        let f = fixture();
        let now = Utc::now();
        let round = f
            .scheduler
            .schedule_round(GameKind::Color, RoundOutcome::Number(4), now - secs(1), now + secs(60))
            .await
            .unwrap();
        f.scheduler.activate_due_rounds(now).await.unwrap();
        assert!(matches!(
            f.scheduler.delete_scheduled_round(&round.id).await,
            Err(EngineError::Validation(_))
        ));

        let later = f
            .scheduler
            .schedule_round(GameKind::Color, RoundOutcome::Number(4), now + secs(100), now + secs(160))
            .await
            .unwrap();
        f.scheduler.delete_scheduled_round(&later.id).await.unwrap();
        assert!(matches!(
            f.scheduler.get_round(&later.id).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
