use crate::games::types::{GameKind, RoundId, RoundOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Round lifecycle: `scheduled -> active -> {completed | expired}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Scheduled,
    Active,
    Completed,
    Expired,
}

impl RoundStatus {
    /// Only forward moves are legal
    pub fn can_transition_to(&self, next: RoundStatus) -> bool {
        matches!(
            (self, next),
            (RoundStatus::Scheduled, RoundStatus::Active)
                | (RoundStatus::Scheduled, RoundStatus::Expired)
                | (RoundStatus::Active, RoundStatus::Completed)
                | (RoundStatus::Active, RoundStatus::Expired)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundStatus::Completed | RoundStatus::Expired)
    }
}

/// Who authored a round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundOrigin {
    Admin,
    Engine,
}

/// Time-boxed unit of a game with a fixed outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: RoundId,
    pub game: GameKind,
    pub status: RoundStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub outcome: RoundOutcome,
    pub origin: RoundOrigin,
    /// Admin round whose outcome an engine round copied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borrowed_from: Option<RoundId>,
    pub message_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Round {
    /// Admin-authored round waiting for its window
    pub fn scheduled(
        game: GameKind,
        outcome: RoundOutcome,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            game,
            status: RoundStatus::Scheduled,
            start_time,
            end_time,
            outcome,
            origin: RoundOrigin::Admin,
            borrowed_from: None,
            message_sent: false,
            created_at: Utc::now(),
        }
    }

    /// Engine round that starts live immediately
    pub fn live(
        game: GameKind,
        outcome: RoundOutcome,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        borrowed_from: Option<RoundId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            game,
            status: RoundStatus::Active,
            start_time,
            end_time,
            outcome,
            origin: RoundOrigin::Engine,
            borrowed_from,
            message_sent: false,
            created_at: Utc::now(),
        }
    }

    /// `start_time <= now < end_time`
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    pub fn seconds_left(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds().max(0)
    }
}
