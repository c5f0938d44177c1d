//! Live bet ledger
//!
//! Tracks every bet and the single open bet allowed per (user, game). Each bet
//! lives behind its own async mutex; settlement locks it, checks the status is
//! still `open` and commits, so concurrent settle attempts resolve to exactly
//! one winner.

use crate::errors::{EngineError, EngineResult};
use crate::games::{Bet, BetId, GameKind, RoundId, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type BetHandle = Arc<Mutex<Bet>>;

#[derive(Default)]
pub struct BetLedger {
    bets: DashMap<BetId, BetHandle>,
    open: DashMap<(UserId, GameKind), BetId>,
    by_round: DashMap<RoundId, Vec<BetId>>,
}

impl BetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new open bet, claiming the user's slot for its game
    pub fn open_bet(&self, bet: Bet) -> EngineResult<BetHandle> {
        if !bet.status.is_open() {
            return Err(EngineError::internal(format!("bet {} registered while settled", bet.id)));
        }

        match self.open.entry((bet.user_id.clone(), bet.game)) {
            Entry::Occupied(_) => {
                return Err(EngineError::AlreadyActiveSession {
                    user_id: bet.user_id,
                    game: bet.game,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(bet.id.clone());
            }
        }

        if let Some(round_id) = &bet.round_id {
            self.by_round
                .entry(round_id.clone())
                .or_default()
                .push(bet.id.clone());
        }

        let id = bet.id.clone();
        let handle = Arc::new(Mutex::new(bet));
        self.bets.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn handle(&self, bet_id: &str) -> Option<BetHandle> {
        self.bets.get(bet_id).map(|h| Arc::clone(h.value()))
    }

    pub fn open_bet_id(&self, user_id: &str, game: GameKind) -> Option<BetId> {
        self.open
            .get(&(user_id.to_string(), game))
            .map(|id| id.value().clone())
    }

    /// Snapshot of a bet
    pub async fn get(&self, bet_id: &str) -> Option<Bet> {
        let handle = self.handle(bet_id)?;
        let bet = handle.lock().await.clone();
        Some(bet)
    }

    pub async fn open_for(&self, user_id: &str, game: GameKind) -> Option<Bet> {
        let id = self.open_bet_id(user_id, game)?;
        self.get(&id).await
    }

    /// Free the user's slot if it still points at this bet
    pub fn release(&self, bet: &Bet) {
        self.open
            .remove_if(&(bet.user_id.clone(), bet.game), |_, id| *id == bet.id);
    }

    pub fn round_bet_ids(&self, round_id: &str) -> Vec<BetId> {
        self.by_round
            .get(round_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    pub async fn bets_in_round(&self, round_id: &str) -> Vec<Bet> {
        let mut bets = Vec::new();
        for id in self.round_bet_ids(round_id) {
            if let Some(bet) = self.get(&id).await {
                bets.push(bet);
            }
        }
        bets
    }

    /// Drop a settled bet from the ledger and the round index
    pub fn forget(&self, bet: &Bet) {
        self.bets.remove(&bet.id);
        if let Some(round_id) = &bet.round_id {
            if let Some(mut ids) = self.by_round.get_mut(round_id) {
                ids.retain(|id| *id != bet.id);
            }
            self.by_round.remove_if(round_id, |_, ids| ids.is_empty());
        }
    }

    /// Drop a finished round's index and its settled bets. Bets still open
    /// stay indexed so a later sweep can reach them. Returns how many bets
    /// were dropped.
    pub async fn evict_round(&self, round_id: &str) -> usize {
        let Some((_, ids)) = self.by_round.remove(round_id) else {
            return 0;
        };

        let mut still_open = Vec::new();
        let mut evicted = 0;
        for id in ids {
            let Some(handle) = self.handle(&id) else {
                continue;
            };
            let open = handle.lock().await.status.is_open();
            if open {
                still_open.push(id);
            } else {
                self.bets.remove(&id);
                evicted += 1;
            }
        }
        if !still_open.is_empty() {
            self.by_round
                .entry(round_id.to_string())
                .or_default()
                .extend(still_open);
        }
        evicted
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Bets currently held, open or settled
    pub fn bet_count(&self) -> usize {
        self.bets.len()
    }

    pub fn round_count(&self) -> usize {
        self.by_round.len()
    }
}
