//! Round and settlement-history storage
//!
//! The engine only talks to these traits. Status changes are compare-and-swap
//! operations and history appends are keyed by bet id, so a second append for
//! the same bet is refused instead of duplicated.

use crate::errors::{EngineError, EngineResult};
use crate::games::{BetId, GameKind, Round, RoundId, RoundOrigin, RoundStatus, SettlementRecord, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Store a new round; ids are unique
    async fn insert(&self, round: Round) -> EngineResult<()>;

    async fn get(&self, id: &str) -> EngineResult<Option<Round>>;

    /// Move `id` from `from` to `to`. Returns false when the current status is not `from`.
    async fn transition(&self, id: &str, from: RoundStatus, to: RoundStatus) -> EngineResult<bool>;

    /// Set the announcement flag. Returns true only for the call that flipped it.
    async fn mark_message_sent(&self, id: &str) -> EngineResult<bool>;

    /// Admin round of `game` whose window covers `now`, latest start first
    async fn covering(&self, game: GameKind, now: DateTime<Utc>) -> EngineResult<Option<Round>>;

    async fn with_status(&self, status: RoundStatus) -> EngineResult<Vec<Round>>;

    async fn list(&self, game: Option<GameKind>, status: Option<RoundStatus>) -> EngineResult<Vec<Round>>;

    /// Completed rounds of `game`, newest first
    async fn completed(&self, game: GameKind, limit: usize) -> EngineResult<Vec<Round>>;

    /// Remove a round that has not started yet
    async fn delete_scheduled(&self, id: &str) -> EngineResult<Round>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a record. Returns false if the bet already has one.
    async fn append(&self, record: SettlementRecord) -> EngineResult<bool>;

    async fn for_bet(&self, bet_id: &str) -> EngineResult<Option<SettlementRecord>>;

    /// Records of `user_id`, newest first
    async fn for_user(
        &self,
        user_id: &str,
        game: Option<GameKind>,
        limit: usize,
    ) -> EngineResult<Vec<SettlementRecord>>;

    async fn count(&self) -> EngineResult<usize>;
}

/// In-process round store
#[derive(Default)]
pub struct InMemoryRoundStore {
    rounds: RwLock<HashMap<RoundId, Round>>,
}

impl InMemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoundStore for InMemoryRoundStore {
    async fn insert(&self, round: Round) -> EngineResult<()> {
        let mut rounds = self.rounds.write().await;
        if rounds.contains_key(&round.id) {
            return Err(EngineError::internal(format!("duplicate round id {}", round.id)));
        }
        rounds.insert(round.id.clone(), round);
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<Option<Round>> {
        Ok(self.rounds.read().await.get(id).cloned())
    }

    async fn transition(&self, id: &str, from: RoundStatus, to: RoundStatus) -> EngineResult<bool> {
        if !from.can_transition_to(to) {
            return Err(EngineError::validation(format!(
                "illegal round transition {:?} -> {:?}",
                from, to
            )));
        }

        let mut rounds = self.rounds.write().await;
        let round = rounds
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(format!("round {}", id)))?;
        if round.status != from {
            return Ok(false);
        }
        round.status = to;
        Ok(true)
    }

    async fn mark_message_sent(&self, id: &str) -> EngineResult<bool> {
        let mut rounds = self.rounds.write().await;
        let round = rounds
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(format!("round {}", id)))?;
        if round.message_sent {
            return Ok(false);
        }
        round.message_sent = true;
        Ok(true)
    }

    async fn covering(&self, game: GameKind, now: DateTime<Utc>) -> EngineResult<Option<Round>> {
        let rounds = self.rounds.read().await;
        Ok(rounds
            .values()
            .filter(|r| {
                r.game == game
                    && r.origin == RoundOrigin::Admin
                    && matches!(r.status, RoundStatus::Scheduled | RoundStatus::Active)
                    && r.covers(now)
            })
            .max_by_key(|r| r.start_time)
            .cloned())
    }

    async fn with_status(&self, status: RoundStatus) -> EngineResult<Vec<Round>> {
        let rounds = self.rounds.read().await;
        Ok(rounds.values().filter(|r| r.status == status).cloned().collect())
    }

    async fn list(&self, game: Option<GameKind>, status: Option<RoundStatus>) -> EngineResult<Vec<Round>> {
        let rounds = self.rounds.read().await;
        let mut matching: Vec<Round> = rounds
            .values()
            .filter(|r| game.map_or(true, |g| r.game == g))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(matching)
    }

    async fn completed(&self, game: GameKind, limit: usize) -> EngineResult<Vec<Round>> {
        let mut done = self.list(Some(game), Some(RoundStatus::Completed)).await?;
        done.truncate(limit);
        Ok(done)
    }

    async fn delete_scheduled(&self, id: &str) -> EngineResult<Round> {
        let mut rounds = self.rounds.write().await;
        match rounds.get(id) {
            None => Err(EngineError::not_found(format!("round {}", id))),
            Some(round) if round.status != RoundStatus::Scheduled => Err(EngineError::validation(
                format!("round {} is {:?}; only scheduled rounds can be deleted", id, round.status),
            )),
            Some(_) => rounds
                .remove(id)
                .ok_or_else(|| EngineError::not_found(format!("round {}", id))),
        }
    }
}

#[derive(Default)]
struct HistoryInner {
    records: Vec<SettlementRecord>,
    settled_bets: HashSet<BetId>,
    by_user: HashMap<UserId, Vec<usize>>,
}

/// In-process append-only settlement history
#[derive(Default)]
pub struct InMemoryHistoryStore {
    inner: RwLock<HistoryInner>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: SettlementRecord) -> EngineResult<bool> {
        let mut inner = self.inner.write().await;
        if !inner.settled_bets.insert(record.bet_id.clone()) {
            return Ok(false);
        }
        let index = inner.records.len();
        inner
            .by_user
            .entry(record.user_id.clone())
            .or_default()
            .push(index);
        inner.records.push(record);
        Ok(true)
    }

    async fn for_bet(&self, bet_id: &str) -> EngineResult<Option<SettlementRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.records.iter().find(|r| r.bet_id == bet_id).cloned())
    }

    async fn for_user(
        &self,
        user_id: &str,
        game: Option<GameKind>,
        limit: usize,
    ) -> EngineResult<Vec<SettlementRecord>> {
        let inner = self.inner.read().await;
        let Some(indexes) = inner.by_user.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(indexes
            .iter()
            .rev()
            .map(|&i| &inner.records[i])
            .filter(|r| game.map_or(true, |g| r.game == g))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> EngineResult<usize> {
        Ok(self.inner.read().await.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{Bet, Multiplier, RoundOutcome, Wager};
    use chrono::Duration;

    fn admin_round(game: GameKind, start_offset_s: i64, len_s: i64) -> Round {
        let start = Utc::now() + Duration::seconds(start_offset_s);
        Round::scheduled(
            game,
            RoundOutcome::CrashPoint(Multiplier(300)),
            start,
            start + Duration::seconds(len_s),
        )
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let store = InMemoryRoundStore::new();
        let round = admin_round(GameKind::Aviator, -1, 60);
        let id = round.id.clone();
        store.insert(round).await.unwrap();

        assert!(store.transition(&id, RoundStatus::Scheduled, RoundStatus::Active).await.unwrap());
        // Second activation observes the changed status
        assert!(!store.transition(&id, RoundStatus::Scheduled, RoundStatus::Active).await.unwrap());
        assert!(store
            .transition(&id, RoundStatus::Completed, RoundStatus::Active)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_covering_prefers_latest_start() {
        let store = InMemoryRoundStore::new();
        let older = admin_round(GameKind::Aviator, -30, 120);
        let newer = admin_round(GameKind::Aviator, -5, 120);
        let other_game = admin_round(GameKind::Chicken, -1, 120);
        let newer_id = newer.id.clone();

        store.insert(older).await.unwrap();
        store.insert(newer).await.unwrap();
        store.insert(other_game).await.unwrap();

        let found = store.covering(GameKind::Aviator, Utc::now()).await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(newer_id));
        assert!(store.covering(GameKind::Color, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_flag_flips_once() {
        let store = InMemoryRoundStore::new();
        let round = admin_round(GameKind::Color, 0, 10);
        let id = round.id.clone();
        store.insert(round).await.unwrap();

        assert!(store.mark_message_sent(&id).await.unwrap());
        assert!(!store.mark_message_sent(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_only_scheduled_rounds_are_deletable() {
        let store = InMemoryRoundStore::new();
        let round = admin_round(GameKind::Aviator, -1, 10);
        let id = round.id.clone();
        store.insert(round).await.unwrap();
        store
            .transition(&id, RoundStatus::Scheduled, RoundStatus::Active)
            .await
            .unwrap();

        assert!(matches!(
            store.delete_scheduled(&id).await,
            Err(EngineError::Validation(_))
        ));

        let pending = admin_round(GameKind::Aviator, 100, 10);
        let pending_id = pending.id.clone();
        store.insert(pending).await.unwrap();
        assert_eq!(store.delete_scheduled(&pending_id).await.unwrap().id, pending_id);
        assert!(store.get(&pending_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_refuses_duplicate_bet() {
        let store = InMemoryHistoryStore::new();
        let bet = Bet::new(
            "u1".into(),
            GameKind::Aviator,
            None,
            10,
            Wager::Crash {
                cash_out_multiplier: None,
            },
        );

        assert!(store.append(SettlementRecord::for_bet(&bet, 0)).await.unwrap());
        assert!(!store.append(SettlementRecord::for_bet(&bet, 25)).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.for_bet(&bet.id).await.unwrap().unwrap().payout_amount, 0);
    }

    #[tokio::test]
    async fn test_user_history_newest_first_with_filter() {
        let store = InMemoryHistoryStore::new();
        for (i, game) in [GameKind::Aviator, GameKind::Chicken, GameKind::Aviator]
            .into_iter()
            .enumerate()
        {
            let bet = Bet::new(
                "u1".into(),
                game,
                None,
                10 + i as u64,
                Wager::Crash {
                    cash_out_multiplier: None,
                },
            );
            store.append(SettlementRecord::for_bet(&bet, 0)).await.unwrap();
        }

        let aviator = store.for_user("u1", Some(GameKind::Aviator), 10).await.unwrap();
        assert_eq!(aviator.iter().map(|r| r.bet_amount).collect::<Vec<_>>(), vec![12, 10]);

        let latest = store.for_user("u1", None, 1).await.unwrap();
        assert_eq!(latest[0].bet_amount, 12);
        assert!(store.for_user("nobody", None, 10).await.unwrap().is_empty());
    }
}
