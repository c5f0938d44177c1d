//! Color draw table
//!
//! A timed round whose winning number is fixed at creation. Bets are open
//! until the round's end time; then the draw is announced and every bet is
//! settled against the color rule table.

use super::{CurrentRound, TablePhase};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::events::{EventBus, GameEvent};
use crate::games::color::{color_of, size_of, ColorWager};
use crate::games::{Amount, Bet, BetId, GameKind, Round, RoundOutcome, UserId, Wager};
use crate::ledger::BetLedger;
use crate::scheduler::RoundScheduler;
use crate::settlement::SweepSummary;
use crate::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Default)]
struct DrawState {
    round: Option<Round>,
    closed: bool,
    by_user: HashMap<UserId, BetId>,
}

impl DrawState {
    fn phase(&self) -> TablePhase {
        match (&self.round, self.closed) {
            (None, _) => TablePhase::Waiting,
            (Some(_), false) => TablePhase::Running,
            (Some(_), true) => TablePhase::Closed,
        }
    }
}

pub struct ColorTable {
    config: EngineConfig,
    state: Mutex<DrawState>,
    wallet: Arc<WalletLedger>,
    ledger: Arc<BetLedger>,
    scheduler: Arc<RoundScheduler>,
    events: EventBus,
}

impl ColorTable {
    pub fn new(
        config: EngineConfig,
        wallet: Arc<WalletLedger>,
        ledger: Arc<BetLedger>,
        scheduler: Arc<RoundScheduler>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(DrawState::default()),
            wallet,
            ledger,
            scheduler,
            events,
        }
    }

    pub async fn start_round(
        &self,
        now: DateTime<Utc>,
        explicit_outcome: Option<RoundOutcome>,
    ) -> EngineResult<Round> {
        let mut state = self.state.lock().await;
        if state.phase() == TablePhase::Running {
            return Err(EngineError::validation("color round already open"));
        }

        let round = self
            .scheduler
            .create_round(GameKind::Color, explicit_outcome, now)
            .await?;
        if let Some(previous) = state.round.take() {
            self.ledger.evict_round(&previous.id).await;
        }
        *state = DrawState {
            round: Some(round.clone()),
            closed: false,
            by_user: HashMap::new(),
        };
        drop(state);

        info!(round_id = %round.id, end = %round.end_time, "color round opened");
        self.events.publish(GameEvent::RoundStarted {
            round_id: round.id.clone(),
            game: GameKind::Color,
            start_time: round.start_time,
            end_time: round.end_time,
        });
        Ok(round)
    }

    pub async fn place_bet(
        &self,
        user_id: &str,
        amount: Amount,
        wager: ColorWager,
        now: DateTime<Utc>,
    ) -> EngineResult<Bet> {
        if amount < self.config.wallet.min_bet {
            return Err(EngineError::validation(format!(
                "bet {} is below the minimum of {}",
                amount, self.config.wallet.min_bet
            )));
        }
        wager.validate().map_err(EngineError::Validation)?;
        if !self.config.color.stake_multipliers.contains(&wager.multiplier) {
            return Err(EngineError::validation(format!(
                "stake multiplier {} is not one of {:?}",
                wager.multiplier, self.config.color.stake_multipliers
            )));
        }
        let stake = wager.stake(amount).ok_or_else(|| {
            EngineError::validation(format!("stake {} x{} overflows", amount, wager.multiplier))
        })?;

        let mut state = self.state.lock().await;
        let round_id = match &state.round {
            Some(round) if !state.closed && now < round.end_time => round.id.clone(),
            _ => return Err(EngineError::NoActiveRound(GameKind::Color)),
        };
        if state.by_user.contains_key(user_id) {
            return Err(EngineError::AlreadyActiveSession {
                user_id: user_id.to_string(),
                game: GameKind::Color,
            });
        }

        let bet = Bet::new(
            user_id.to_string(),
            GameKind::Color,
            Some(round_id.clone()),
            stake,
            Wager::Color(wager),
        );
        self.wallet.debit(user_id, stake, "bet", Some(&bet.id))?;
        if let Err(e) = self.ledger.open_bet(bet.clone()) {
            self.wallet.credit(user_id, stake, "refund", Some(&bet.id))?;
            return Err(e);
        }
        state.by_user.insert(user_id.to_string(), bet.id.clone());

        debug!(user_id, bet_id = %bet.id, stake, selection = %wager.selection, "color bet placed");
        Ok(bet)
    }

    /// Announce the time left; `None` when no round is open
    pub async fn countdown(&self, now: DateTime<Utc>) -> Option<i64> {
        let state = self.state.lock().await;
        let round = state.round.as_ref().filter(|_| !state.closed)?;
        let seconds_left = round.seconds_left(now);
        self.events.publish(GameEvent::Countdown {
            round_id: round.id.clone(),
            seconds_left,
        });
        Some(seconds_left)
    }

    /// Draw and settle the open round once its end time has passed
    pub async fn finish_if_due(&self, now: DateTime<Utc>) -> Option<SweepSummary> {
        self.finish(Some(now)).await
    }

    /// Draw and settle the open round immediately
    pub async fn finish_now(&self) -> Option<SweepSummary> {
        self.finish(None).await
    }

    async fn finish(&self, due_at: Option<DateTime<Utc>>) -> Option<SweepSummary> {
        let mut state = self.state.lock().await;
        let round = match &state.round {
            Some(round) if !state.closed => round.clone(),
            _ => return None,
        };
        if due_at.is_some_and(|now| now < round.end_time) {
            return None;
        }
        state.closed = true;
        drop(state);

        let Some(number) = round.outcome.winning_number() else {
            error!(round_id = %round.id, "color round has no winning number");
            return None;
        };
        info!(round_id = %round.id, winning_number = number, "color round drawn");
        self.events.publish(GameEvent::RoundResult {
            round_id: round.id.clone(),
            game: GameKind::Color,
            winning_number: number,
            color: color_of(number),
            size: size_of(number),
        });

        Some(self.scheduler.close_round(&round).await)
    }

    pub async fn current_round(&self, now: DateTime<Utc>) -> Option<CurrentRound> {
        let state = self.state.lock().await;
        let round = state.round.as_ref()?;
        Some(CurrentRound {
            round_id: round.id.clone(),
            game: GameKind::Color,
            phase: state.phase(),
            start_time: round.start_time,
            end_time: round.end_time,
            multiplier: None,
            crash_point: None,
            seconds_left: round.seconds_left(now),
        })
    }

    /// Run rounds back to back until cancelled. On cancellation the open
    /// round is drawn right away.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.color.countdown_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let gap = chrono::Duration::from_std(self.config.color.round_gap())
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        let mut next_start = Utc::now();
        info!("color loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let now = Utc::now();
            let phase = self.state.lock().await.phase();
            match phase {
                TablePhase::Running => {
                    self.countdown(now).await;
                    if self.finish_if_due(now).await.is_some() {
                        next_start = now + gap;
                    }
                }
                TablePhase::Waiting | TablePhase::Closed if now >= next_start => {
                    if let Err(e) = self.start_round(now, None).await {
                        error!("failed to open color round: {}", e);
                        next_start = now + gap;
                    }
                }
                _ => {}
            }
        }

        self.finish_now().await;
        info!("color loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::color::{Color, ColorSelection, Size};
    use crate::games::{BetStatus, Multiplier};
    use crate::settlement::SettlementEngine;
    use crate::storage::{HistoryStore, InMemoryHistoryStore, InMemoryRoundStore, RoundStore};
    use chrono::Duration;

    struct Fixture {
        table: ColorTable,
        scheduler: Arc<RoundScheduler>,
        wallet: Arc<WalletLedger>,
        ledger: Arc<BetLedger>,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        let config = EngineConfig::default();
        let wallet = Arc::new(WalletLedger::new());
        let ledger = Arc::new(BetLedger::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let events = EventBus::new(64);
        let settlement = Arc::new(SettlementEngine::new(
            Arc::clone(&wallet),
            Arc::clone(&ledger),
            history as Arc<dyn HistoryStore>,
        ));
        let scheduler = Arc::new(RoundScheduler::new(
            config.clone(),
            Arc::new(InMemoryRoundStore::new()) as Arc<dyn RoundStore>,
            settlement,
            events.clone(),
        ));
        let table = ColorTable::new(
            config,
            Arc::clone(&wallet),
            Arc::clone(&ledger),
            Arc::clone(&scheduler),
            events.clone(),
        );
        for user in ["alice", "bob", "carol"] {
            wallet.open_account(user, 1_000).unwrap();
        }
        Fixture {
            table,
            scheduler,
            wallet,
            ledger,
            events,
        }
    }

    fn on(selection: ColorSelection) -> ColorWager {
        ColorWager {
            selection,
            multiplier: 1,
        }
    }

    async fn open_with_number(f: &Fixture, number: u8) -> Round {
        let now = Utc::now();
        f.scheduler
            .schedule_round(
                GameKind::Color,
                RoundOutcome::Number(number),
                now - Duration::seconds(1),
                now + Duration::seconds(600),
            )
            .await
            .unwrap();
        f.table.start_round(now, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_violet_zero_pays_four_and_a_half() {
        let f = fixture();
        let round = open_with_number(&f, 0).await;
        let now = Utc::now();

        let violet = f
            .table
            .place_bet("alice", 10, on(ColorSelection::Color(Color::Violet)), now)
            .await
            .unwrap();
        let small = f
            .table
            .place_bet("bob", 10, on(ColorSelection::Size(Size::Small)), now)
            .await
            .unwrap();
        let number = f
            .table
            .place_bet("carol", 10, on(ColorSelection::Number(3)), now)
            .await
            .unwrap();

        assert!(f.table.finish_if_due(now).await.is_none());
        let summary = f.table.finish_if_due(round.end_time).await.unwrap();
        assert_eq!(summary.settled, 3);
        assert_eq!(summary.paid_out, 45 + 20);

        assert_eq!(f.wallet.balance("alice").unwrap(), 1_035);
        assert_eq!(f.wallet.balance("bob").unwrap(), 1_010);
        assert_eq!(f.wallet.balance("carol").unwrap(), 990);
        assert_eq!(f.ledger.get(&violet.id).await.unwrap().status, BetStatus::Won);
        assert_eq!(f.ledger.get(&small.id).await.unwrap().payout, 20);
        assert_eq!(f.ledger.get(&number.id).await.unwrap().status, BetStatus::Lost);
    }

    #[tokio::test]
    async fn test_bet_rules() {
        let f = fixture();
        let now = Utc::now();
        assert_eq!(
            f.table
                .place_bet("alice", 10, on(ColorSelection::Number(1)), now)
                .await
                .unwrap_err(),
            EngineError::NoActiveRound(GameKind::Color)
        );

        let round = open_with_number(&f, 7).await;
        assert!(matches!(
            f.table.place_bet("alice", 10, on(ColorSelection::Number(12)), now).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            f.table
                .place_bet("alice", 10, ColorWager { selection: ColorSelection::Number(1), multiplier: 0 }, now)
                .await,
            Err(EngineError::Validation(_))
        ));

        f.table
            .place_bet("alice", 10, on(ColorSelection::Number(7)), now)
            .await
            .unwrap();
        assert!(matches!(
            f.table.place_bet("alice", 10, on(ColorSelection::Number(1)), now).await,
            Err(EngineError::AlreadyActiveSession { .. })
        ));
        assert_eq!(
            f.table
                .place_bet("bob", 10, on(ColorSelection::Number(1)), round.end_time)
                .await
                .unwrap_err(),
            EngineError::NoActiveRound(GameKind::Color)
        );
    }

    #[tokio::test]
    async fn test_stake_multiplier_scales_stake_and_payout() {
        let f = fixture();
        let round = open_with_number(&f, 7).await;
        f.table
            .place_bet(
                "alice",
                20,
                ColorWager {
                    selection: ColorSelection::Number(7),
                    multiplier: 5,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(f.wallet.balance("alice").unwrap(), 1_000 - 100);
        let summary = f.table.finish_now().await.unwrap();
        assert_eq!(summary.paid_out, Multiplier(900).apply(100));
        assert!(f.table.finish_if_due(round.end_time).await.is_none());
        assert_eq!(f.wallet.balance("alice").unwrap(), 1_000 - 100 + 900);
    }

    #[tokio::test]
    async fn test_payout_never_exceeds_rate_times_debited_stake() {
        let f = fixture();
        f.wallet.open_account("dave", 10).unwrap();
        open_with_number(&f, 7).await;
        let now = Utc::now();
        let big = |multiplier| ColorWager {
            selection: ColorSelection::Size(Size::Big),
            multiplier,
        };

        assert!(matches!(
            f.table.place_bet("dave", 10, big(1_000_000), now).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            f.table.place_bet("dave", 10, big(5), now).await,
            Err(EngineError::InsufficientBalance { .. })
        ));
        assert_eq!(f.wallet.balance("dave").unwrap(), 10);

        let bet = f.table.place_bet("dave", 10, big(1), now).await.unwrap();
        assert_eq!(bet.amount, 10);
        let summary = f.table.finish_now().await.unwrap();
        assert_eq!(summary.paid_out, 20);
        assert_eq!(f.wallet.balance("dave").unwrap(), 20);

        let debited: u64 = f
            .wallet
            .entries("dave")
            .unwrap()
            .iter()
            .filter(|e| e.kind == crate::wallet::EntryKind::Debit)
            .map(|e| e.amount)
            .sum();
        assert!(summary.paid_out <= Multiplier(200).apply(debited));
    }

    #[tokio::test]
    async fn test_finished_round_is_evicted_when_next_opens() {
        let f = fixture();
        open_with_number(&f, 2).await;
        let bet = f
            .table
            .place_bet("alice", 10, on(ColorSelection::Color(Color::Red)), Utc::now())
            .await
            .unwrap();
        f.table.finish_now().await.unwrap();
        assert_eq!(f.ledger.get(&bet.id).await.unwrap().status, BetStatus::Won);

        f.table.start_round(Utc::now(), None).await.unwrap();
        assert!(f.ledger.get(&bet.id).await.is_none());
        assert_eq!(f.ledger.bet_count(), 0);
        assert_eq!(f.ledger.round_count(), 0);
    }

    #[tokio::test]
    async fn test_countdown_and_result_events() {
        let f = fixture();
        let mut rx = f.events.subscribe();
        let round = open_with_number(&f, 4).await;

        assert!(matches!(rx.recv().await.unwrap(), GameEvent::RoundStarted { .. }));
        let left = f.table.countdown(round.end_time - Duration::seconds(3)).await;
        assert_eq!(left, Some(3));
        assert_eq!(
            rx.recv().await.unwrap(),
            GameEvent::Countdown {
                round_id: round.id.clone(),
                seconds_left: 3,
            }
        );

        f.table.finish_now().await;
        assert_eq!(
            rx.recv().await.unwrap(),
            GameEvent::RoundResult {
                round_id: round.id.clone(),
                game: GameKind::Color,
                winning_number: 4,
                color: Color::Red,
                size: Size::Small,
            }
        );
        assert!(f.table.countdown(Utc::now()).await.is_none());
        let view = f.table.current_round(Utc::now()).await.unwrap();
        assert_eq!(view.phase, TablePhase::Closed);
    }
}
