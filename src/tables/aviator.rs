//! Aviator crash table
//!
//! The multiplier climbs one increment per tick until it reaches the round's
//! crash point. Bets are taken only near the start of the flight; cash-outs
//! lock in the live multiplier; the crash sweeps every bet still open.

use super::{CurrentRound, TablePhase};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::events::{EventBus, GameEvent};
use crate::games::{
    Amount, Bet, BetId, GameKind, LiveBet, Multiplier, MultiplierEngine, Round, RoundOutcome,
    UserId, Wager,
};
use crate::ledger::BetLedger;
use crate::scheduler::RoundScheduler;
use crate::settlement::{Resolution, SettlementEngine, SweepSummary};
use crate::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// No round in flight
    Idle,
    Climbing(Multiplier),
    Crashed { round: Round, summary: SweepSummary },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashOut {
    pub multiplier: Multiplier,
    pub payout: Amount,
    pub bet: Bet,
}

struct FlightState {
    phase: TablePhase,
    round: Option<Round>,
    crash_point: Multiplier,
    tick: u64,
    multiplier: Multiplier,
    bets: Vec<BetId>,
    by_user: HashMap<UserId, BetId>,
}

impl Default for FlightState {
    fn default() -> Self {
        Self {
            phase: TablePhase::Waiting,
            round: None,
            crash_point: Multiplier::ONE,
            tick: 0,
            multiplier: Multiplier::ONE,
            bets: Vec::new(),
            by_user: HashMap::new(),
        }
    }
}

pub struct AviatorTable {
    config: EngineConfig,
    engine: MultiplierEngine,
    state: Mutex<FlightState>,
    wallet: Arc<WalletLedger>,
    ledger: Arc<BetLedger>,
    settlement: Arc<SettlementEngine>,
    scheduler: Arc<RoundScheduler>,
    events: EventBus,
}

impl AviatorTable {
    pub fn new(
        config: EngineConfig,
        wallet: Arc<WalletLedger>,
        ledger: Arc<BetLedger>,
        settlement: Arc<SettlementEngine>,
        scheduler: Arc<RoundScheduler>,
        events: EventBus,
    ) -> Self {
        let engine = MultiplierEngine::new(config.aviator.clone(), config.stepped.clone());
        Self {
            config,
            engine,
            state: Mutex::new(FlightState::default()),
            wallet,
            ledger,
            settlement,
            scheduler,
            events,
        }
    }

    /// Launch a new round. Without an explicit outcome the crash point comes
    /// from a covering admin round if there is one.
    pub async fn start_round(
        &self,
        now: DateTime<Utc>,
        explicit_outcome: Option<RoundOutcome>,
    ) -> EngineResult<Round> {
        let mut state = self.state.lock().await;
        if state.phase == TablePhase::Running {
            return Err(EngineError::validation("aviator round already in flight"));
        }

        let round = self
            .scheduler
            .create_round(GameKind::Aviator, explicit_outcome, now)
            .await?;
        let crash_point = round.outcome.crash_point().ok_or_else(|| {
            EngineError::internal(format!("aviator round {} has no crash point", round.id))
        })?;
        if let Some(previous) = state.round.take() {
            self.ledger.evict_round(&previous.id).await;
        }

        *state = FlightState {
            phase: TablePhase::Running,
            round: Some(round.clone()),
            crash_point,
            ..FlightState::default()
        };
        drop(state);

        self.events.publish(GameEvent::RoundStarted {
            round_id: round.id.clone(),
            game: GameKind::Aviator,
            start_time: round.start_time,
            end_time: round.end_time,
        });
        self.events.publish(GameEvent::MultiplierUpdate {
            round_id: round.id.clone(),
            multiplier: Multiplier::ONE,
        });
        Ok(round)
    }

    /// Advance the flight by one tick, crashing and sweeping when the crash point is reached
    pub async fn tick(&self) -> TickOutcome {
        let mut state = self.state.lock().await;
        if state.phase != TablePhase::Running {
            return TickOutcome::Idle;
        }
        let round = match &state.round {
            Some(round) => round.clone(),
            None => return TickOutcome::Idle,
        };

        state.tick += 1;
        state.multiplier = self.engine.multiplier_at_tick(state.tick).min(state.crash_point);
        let multiplier = state.multiplier;
        self.events.publish(GameEvent::MultiplierUpdate {
            round_id: round.id.clone(),
            multiplier,
        });
        if multiplier < state.crash_point {
            return TickOutcome::Climbing(multiplier);
        }

        // New bets and cash-outs are refused from here on.
        state.phase = TablePhase::Closed;
        let crash_point = state.crash_point;
        drop(state);

        info!(round_id = %round.id, %crash_point, "aviator round crashed");
        self.events.publish(GameEvent::RoundCrashed {
            round_id: round.id.clone(),
            crash_point,
        });

        let summary = self.scheduler.close_round(&round).await;
        TickOutcome::Crashed { round, summary }
    }

    pub async fn place_bet(&self, user_id: &str, amount: Amount) -> EngineResult<Bet> {
        if amount < self.config.wallet.min_bet {
            return Err(EngineError::validation(format!(
                "bet {} is below the minimum of {}",
                amount, self.config.wallet.min_bet
            )));
        }

        let mut state = self.state.lock().await;
        let round_id = match (&state.phase, &state.round) {
            (TablePhase::Running, Some(round))
                if state.multiplier <= self.config.aviator.acceptance_ceiling =>
            {
                round.id.clone()
            }
            _ => return Err(EngineError::NoActiveRound(GameKind::Aviator)),
        };
        if state.by_user.contains_key(user_id) {
            return Err(EngineError::AlreadyActiveSession {
                user_id: user_id.to_string(),
                game: GameKind::Aviator,
            });
        }

        let bet = Bet::new(
            user_id.to_string(),
            GameKind::Aviator,
            Some(round_id.clone()),
            amount,
            Wager::Crash {
                cash_out_multiplier: None,
            },
        );
        self.wallet.debit(user_id, amount, "bet", Some(&bet.id))?;
        if let Err(e) = self.ledger.open_bet(bet.clone()) {
            self.wallet.credit(user_id, amount, "refund", Some(&bet.id))?;
            return Err(e);
        }
        state.bets.push(bet.id.clone());
        state.by_user.insert(user_id.to_string(), bet.id.clone());
        drop(state);

        debug!(user_id, bet_id = %bet.id, amount, round_id = %round_id, "aviator bet placed");
        self.publish_live_bets(round_id).await;
        Ok(bet)
    }

    /// Lock in the live multiplier for the user's bet in this round
    pub async fn cash_out(&self, user_id: &str) -> EngineResult<CashOut> {
        let state = self.state.lock().await;
        let bet_id = state
            .by_user
            .get(user_id)
            .cloned()
            .ok_or_else(|| EngineError::NoActiveSession {
                user_id: user_id.to_string(),
                game: GameKind::Aviator,
            })?;
        let flying = state.phase == TablePhase::Running && state.multiplier < state.crash_point;
        let round_id = match (flying, state.round.as_ref().map(|r| r.id.clone())) {
            (true, Some(round_id)) => round_id,
            (_, round_id) => {
                drop(state);
                // An evicted bet was settled before its round was dropped.
                let settled = self
                    .ledger
                    .get(&bet_id)
                    .await
                    .map_or(true, |b| !b.status.is_open());
                warn!(user_id, bet_id = %bet_id, "cash-out after crash");
                return Err(match round_id {
                    Some(round_id) if !settled => EngineError::RoundAlreadyCrashed(round_id),
                    _ => EngineError::BetAlreadySettled(bet_id),
                });
            }
        };

        // Table lock held so the flight cannot crash mid cash-out.
        let multiplier = state.multiplier;
        let bet = self
            .settlement
            .settle(&bet_id, Resolution::LockedIn(multiplier))
            .await?;
        drop(state);

        info!(user_id, bet_id = %bet.id, %multiplier, payout = bet.payout, "cashed out");
        self.events.publish(GameEvent::CashedOut {
            round_id: round_id.clone(),
            user_id: user_id.to_string(),
            multiplier,
            payout: bet.payout,
        });
        self.publish_live_bets(round_id).await;

        Ok(CashOut {
            multiplier,
            payout: bet.payout,
            bet,
        })
    }

    /// Every bet of the current round, open or settled
    pub async fn live_bets(&self) -> Vec<LiveBet> {
        let ids = self.state.lock().await.bets.clone();
        let mut bets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bet) = self.ledger.get(&id).await {
                bets.push(LiveBet::from(&bet));
            }
        }
        bets
    }

    /// Largest bets of the current round
    pub async fn top_bets(&self) -> Vec<LiveBet> {
        let mut bets = self.live_bets().await;
        bets.sort_by(|a, b| b.amount.cmp(&a.amount));
        bets.truncate(self.config.aviator.top_bets);
        bets
    }

    pub async fn current_round(&self, now: DateTime<Utc>) -> Option<CurrentRound> {
        let state = self.state.lock().await;
        let round = state.round.as_ref()?;
        let crashed = state.phase == TablePhase::Closed;
        Some(CurrentRound {
            round_id: round.id.clone(),
            game: GameKind::Aviator,
            phase: state.phase,
            start_time: round.start_time,
            end_time: round.end_time,
            multiplier: Some(state.multiplier),
            crash_point: crashed.then_some(state.crash_point),
            seconds_left: if crashed { 0 } else { round.seconds_left(now) },
        })
    }

    async fn publish_live_bets(&self, round_id: String) {
        let bets = self.live_bets().await;
        self.events.publish(GameEvent::NewLiveBet { round_id, bets });
    }

    /// Fly rounds back to back until cancelled. A round already in flight is
    /// flown to its crash before the loop exits.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("aviator loop started");
        while !cancel.is_cancelled() {
            // A round opened through `create_round` is flown as is.
            if let Err(e) = self.start_round(Utc::now(), None).await {
                debug!("no new aviator round: {}", e);
            }
            self.fly().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.aviator.round_gap()) => {}
            }
        }
        info!("aviator loop stopped");
    }

    async fn fly(&self) {
        let mut interval = tokio::time::interval(self.config.aviator.tick_interval());
        // The first tick of an interval completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            match self.tick().await {
                TickOutcome::Climbing(_) => {}
                TickOutcome::Crashed { .. } | TickOutcome::Idle => return,
            }
        }
    }
}
