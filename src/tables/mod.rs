//! Live game tables
//!
//! One owned state object per round-based game, guarded by an async mutex and
//! driven by its own periodic task.

pub mod aviator;
pub mod color;

pub use aviator::{AviatorTable, CashOut, TickOutcome};
pub use color::ColorTable;

use crate::games::{GameKind, Multiplier, RoundId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TablePhase {
    /// Between rounds
    Waiting,
    /// Round live and taking actions
    Running,
    /// Round resolved; bets are being or have been swept
    Closed,
}

/// What `getCurrentRound` returns for a live table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentRound {
    pub round_id: RoundId,
    pub game: GameKind,
    pub phase: TablePhase,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<Multiplier>,
    /// Only revealed once the round has crashed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<Multiplier>,
    pub seconds_left: i64,
}
