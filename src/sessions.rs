//! Stepped-game sessions
//!
//! A session is a bet whose outcome sequence is snapshotted when it starts.
//! Each `advance` reveals the next element; the user leaves with `stop` or
//! `collect`, or loses on the terminal zero.

use crate::config::WalletConfig;
use crate::errors::{EngineError, EngineResult};
use crate::games::{Amount, Bet, GameFamily, GameKind, Multiplier, RoundOutcome, Wager};
use crate::ledger::{BetHandle, BetLedger};
use crate::scheduler::RoundScheduler;
use crate::settlement::{Resolution, SettlementEngine};
use crate::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Element uncovered by one `advance`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reveal {
    Multiplier(Multiplier),
    Tile(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub reveal: Reveal,
    pub step_index: usize,
    /// Terminal zero hit; the session is settled as lost
    pub busted: bool,
    pub bet: Bet,
}

pub struct SessionManager {
    wallet_config: WalletConfig,
    wallet: Arc<WalletLedger>,
    ledger: Arc<BetLedger>,
    settlement: Arc<SettlementEngine>,
    scheduler: Arc<RoundScheduler>,
}

impl SessionManager {
    pub fn new(
        wallet_config: WalletConfig,
        wallet: Arc<WalletLedger>,
        ledger: Arc<BetLedger>,
        settlement: Arc<SettlementEngine>,
        scheduler: Arc<RoundScheduler>,
    ) -> Self {
        Self {
            wallet_config,
            wallet,
            ledger,
            settlement,
            scheduler,
        }
    }

    pub async fn start_session(
        &self,
        user_id: &str,
        game: GameKind,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> EngineResult<Bet> {
        if game.family() != GameFamily::Stepped {
            return Err(EngineError::validation(format!(
                "{} is not a stepped game; place a round bet instead",
                game
            )));
        }
        if amount < self.wallet_config.min_bet {
            return Err(EngineError::validation(format!(
                "bet {} is below the minimum of {}",
                amount, self.wallet_config.min_bet
            )));
        }

        if let Some(abandoned) = self.ledger.open_bet_id(user_id, game) {
            if self
                .settlement
                .settle_if_open(&abandoned, Resolution::Forfeit)
                .await?
                .is_some()
            {
                warn!(user_id, %game, bet_id = %abandoned, "abandoned session force-settled as loss");
            }
        }

        let (outcome, admin) = self.scheduler.resolve_outcome(game, now).await?;
        let bet = Bet::new(
            user_id.to_string(),
            game,
            admin.map(|r| r.id),
            amount,
            Wager::Steps {
                outcome,
                current_step_index: 0,
            },
        );

        self.wallet.debit(user_id, amount, "bet", Some(&bet.id))?;
        let snapshot = bet.clone();
        if let Err(e) = self.ledger.open_bet(bet) {
            // Lost the slot to a concurrent start; hand the stake back.
            self.wallet.credit(user_id, amount, "refund", Some(&snapshot.id))?;
            return Err(e);
        }

        info!(user_id, %game, bet_id = %snapshot.id, amount, "session started");
        Ok(snapshot)
    }

    fn open_handle(&self, user_id: &str, game: GameKind) -> EngineResult<BetHandle> {
        self.ledger
            .open_bet_id(user_id, game)
            .and_then(|id| self.ledger.handle(&id))
            .ok_or_else(|| EngineError::NoActiveSession {
                user_id: user_id.to_string(),
                game,
            })
    }

    /// Reveal the next element of the session's sequence
    pub async fn advance(&self, user_id: &str, game: GameKind) -> EngineResult<StepResult> {
        let handle = self.open_handle(user_id, game)?;
        let mut bet = handle.lock().await;
        if !bet.status.is_open() {
            return Err(EngineError::NoActiveSession {
                user_id: user_id.to_string(),
                game,
            });
        }

        let (reveal, step_index) = match &bet.wager {
            Wager::Steps {
                outcome,
                current_step_index,
            } => {
                let index = *current_step_index;
                let reveal = match outcome {
                    RoundOutcome::Steps(steps) => steps.get(index).copied().map(Reveal::Multiplier),
                    RoundOutcome::Tiles(tiles) => tiles.get(index).copied().map(Reveal::Tile),
                    other => {
                        return Err(EngineError::internal(format!(
                            "session {} carries non-stepped outcome {:?}",
                            bet.id, other
                        )))
                    }
                };
                let reveal = reveal.ok_or_else(|| {
                    EngineError::validation(format!("session {} has no steps left", bet.id))
                })?;
                (reveal, index)
            }
            _ => return Err(EngineError::internal(format!("bet {} is not a session", bet.id))),
        };

        let busted = matches!(reveal, Reveal::Multiplier(m) if m.is_zero());
        if busted {
            self.settlement
                .settle_locked(&mut bet, Resolution::Forfeit)
                .await?;
            info!(user_id, %game, bet_id = %bet.id, step_index, "session busted");
        } else if let Wager::Steps {
            current_step_index, ..
        } = &mut bet.wager
        {
            *current_step_index += 1;
            debug!(user_id, %game, bet_id = %bet.id, step_index, "step revealed");
        }

        Ok(StepResult {
            reveal,
            step_index,
            busted,
            bet: bet.clone(),
        })
    }

    /// End the session with a caller-computed payout; zero settles as lost
    pub async fn stop(&self, user_id: &str, game: GameKind, payout: Amount) -> EngineResult<Bet> {
        let handle = self.open_handle(user_id, game)?;
        let mut bet = handle.lock().await;
        self.settlement
            .settle_locked(&mut bet, Resolution::Fixed(payout))
            .await?;
        info!(user_id, %game, bet_id = %bet.id, payout, "session stopped");
        Ok(bet.clone())
    }

    /// Cash in at the last revealed step multiplier
    pub async fn collect(&self, user_id: &str, game: GameKind) -> EngineResult<Bet> {
        let handle = self.open_handle(user_id, game)?;
        let mut bet = handle.lock().await;

        let locked = match &bet.wager {
            Wager::Steps {
                outcome: RoundOutcome::Steps(steps),
                current_step_index,
            } => current_step_index
                .checked_sub(1)
                .and_then(|last| steps.get(last).copied())
                .ok_or_else(|| EngineError::validation("nothing revealed yet"))?,
            Wager::Steps { .. } => {
                return Err(EngineError::validation(format!(
                    "{} payouts are settled with stop",
                    game
                )))
            }
            _ => return Err(EngineError::internal(format!("bet {} is not a session", bet.id))),
        };

        self.settlement
            .settle_locked(&mut bet, Resolution::LockedIn(locked))
            .await?;
        info!(user_id, %game, bet_id = %bet.id, multiplier = %locked, payout = bet.payout, "session collected");
        Ok(bet.clone())
    }

    pub async fn current_session(&self, user_id: &str, game: GameKind) -> Option<Bet> {
        self.ledger.open_for(user_id, game).await
    }
}
