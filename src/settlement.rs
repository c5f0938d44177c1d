//! Settlement engine
//!
//! The one place where a bet leaves the `open` state. Under the bet's lock it
//! checks the bet is still open, pays out through the wallet, marks the bet
//! settled and writes exactly one history record. Anything that finds the bet
//! already settled loses the race and changes nothing.

use crate::errors::{EngineError, EngineResult};
use crate::games::{
    Amount, Bet, BetStatus, GameFamily, GameKind, Multiplier, Round, SettlementRecord, Wager,
};
use crate::ledger::BetLedger;
use crate::storage::HistoryStore;
use crate::wallet::WalletLedger;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a bet is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Crash sweep, terminal step, round expiry or forced close
    Forfeit,
    /// Cash-out or collect at a locked multiplier
    LockedIn(Multiplier),
    /// Caller-computed payout from a stop request
    Fixed(Amount),
    /// Color draw against the winning number
    Draw(u8),
}

impl Resolution {
    /// Payout this resolution yields for `bet`
    pub fn payout(&self, bet: &Bet) -> Amount {
        match (self, &bet.wager) {
            (Resolution::Forfeit, _) => 0,
            (Resolution::LockedIn(m), _) => m.apply(bet.amount),
            (Resolution::Fixed(amount), _) => *amount,
            (Resolution::Draw(number), Wager::Color(wager)) => wager.payout(bet.amount, *number),
            (Resolution::Draw(_), _) => 0,
        }
    }

    /// Default resolution when a round closes with bets still open
    pub fn for_round_close(round: &Round) -> Self {
        match (round.game, round.outcome.winning_number()) {
            (GameKind::Color, Some(number)) => Resolution::Draw(number),
            _ => Resolution::Forfeit,
        }
    }
}

/// Counts from a round-wide sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub settled: usize,
    pub already_settled: usize,
    pub failed: usize,
    pub paid_out: Amount,
}

pub struct SettlementEngine {
    wallet: Arc<WalletLedger>,
    ledger: Arc<BetLedger>,
    history: Arc<dyn HistoryStore>,
}

impl SettlementEngine {
    pub fn new(
        wallet: Arc<WalletLedger>,
        ledger: Arc<BetLedger>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            wallet,
            ledger,
            history,
        }
    }

    /// Settle a bet; `BetAlreadySettled` if someone else got there first
    pub async fn settle(&self, bet_id: &str, resolution: Resolution) -> EngineResult<Bet> {
        let handle = self
            .ledger
            .handle(bet_id)
            .ok_or_else(|| EngineError::not_found(format!("bet {}", bet_id)))?;
        let mut bet = handle.lock().await;
        self.settle_locked(&mut bet, resolution).await?;
        Ok(bet.clone())
    }

    /// Like [`settle`](Self::settle) but treats an already settled bet as success
    pub async fn settle_if_open(
        &self,
        bet_id: &str,
        resolution: Resolution,
    ) -> EngineResult<Option<Bet>> {
        // A bet missing from the ledger was settled and dropped already.
        let Some(handle) = self.ledger.handle(bet_id) else {
            return Ok(None);
        };
        let mut bet = handle.lock().await;
        match self.settle_locked(&mut bet, resolution).await {
            Ok(_) => Ok(Some(bet.clone())),
            Err(EngineError::BetAlreadySettled(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Commit a settlement on a bet whose lock the caller already holds
    pub async fn settle_locked(&self, bet: &mut Bet, resolution: Resolution) -> EngineResult<Amount> {
        if !bet.status.is_open() {
            return Err(EngineError::BetAlreadySettled(bet.id.clone()));
        }

        let payout = resolution.payout(bet);
        if payout > 0 {
            self.wallet
                .credit(&bet.user_id, payout, "payout", Some(&bet.id))?;
        }

        if let (Resolution::LockedIn(m), Wager::Crash { cash_out_multiplier }) =
            (resolution, &mut bet.wager)
        {
            *cash_out_multiplier = Some(m);
        }
        bet.status = if payout > 0 { BetStatus::Won } else { BetStatus::Lost };
        bet.payout = payout;
        bet.settled_at = Some(Utc::now());
        self.ledger.release(bet);
        // Session bets are done once settled; table bets stay until their round is evicted.
        if bet.game.family() == GameFamily::Stepped {
            self.ledger.forget(bet);
        }

        // The bet is final from here on; a failed history write must not reopen it.
        let record = SettlementRecord::for_bet(bet, payout);
        match self.history.append(record).await {
            Ok(true) => {}
            Ok(false) => warn!(bet_id = %bet.id, "settlement record already present"),
            Err(e) => {
                error!(bet_id = %bet.id, "failed to write settlement record: {}", e);
                return Err(e);
            }
        }

        debug!(
            bet_id = %bet.id,
            user_id = %bet.user_id,
            game = %bet.game,
            payout,
            "bet settled"
        );
        Ok(payout)
    }

    /// Settle every bet of `round` that is still open
    pub async fn settle_round(&self, round: &Round) -> SweepSummary {
        let resolution = Resolution::for_round_close(round);
        let mut summary = SweepSummary::default();

        for bet_id in self.ledger.round_bet_ids(&round.id) {
            match self.settle_if_open(&bet_id, resolution).await {
                Ok(Some(bet)) => {
                    summary.settled += 1;
                    summary.paid_out += bet.payout;
                }
                Ok(None) => summary.already_settled += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(round_id = %round.id, bet_id = %bet_id, "sweep failed for bet: {}", e);
                }
            }
        }

        if summary.settled > 0 || summary.failed > 0 {
            info!(
                round_id = %round.id,
                game = %round.game,
                settled = summary.settled,
                skipped = summary.already_settled,
                failed = summary.failed,
                paid_out = summary.paid_out,
                "round swept"
            );
        }
        summary
    }
}
