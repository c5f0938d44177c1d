use crate::games::color::ColorWager;
use crate::games::types::{Amount, BetId, GameKind, GameOutcome, Multiplier, RoundId, RoundOutcome, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Open,
    Won,
    Lost,
}

impl BetStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, BetStatus::Open)
    }
}

/// Kind-specific state of a bet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "wager", rename_all = "snake_case")]
pub enum Wager {
    /// Continuous game; multiplier locked in at cash-out
    Crash {
        #[serde(skip_serializing_if = "Option::is_none")]
        cash_out_multiplier: Option<Multiplier>,
    },
    /// Stepped game with its outcome snapshot taken at session start
    Steps {
        outcome: RoundOutcome,
        current_step_index: usize,
    },
    Color(ColorWager),
}

/// One user's wager, open until settled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub id: BetId,
    pub user_id: UserId,
    pub game: GameKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    pub amount: Amount,
    pub status: BetStatus,
    pub wager: Wager,
    pub payout: Amount,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    pub fn new(
        user_id: UserId,
        game: GameKind,
        round_id: Option<RoundId>,
        amount: Amount,
        wager: Wager,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            game,
            round_id,
            amount,
            status: BetStatus::Open,
            wager,
            payout: 0,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    pub fn cash_out_multiplier(&self) -> Option<Multiplier> {
        match &self.wager {
            Wager::Crash { cash_out_multiplier } => *cash_out_multiplier,
            _ => None,
        }
    }

    pub fn current_step_index(&self) -> Option<usize> {
        match &self.wager {
            Wager::Steps {
                current_step_index, ..
            } => Some(*current_step_index),
            _ => None,
        }
    }
}

/// Append-only history row, exactly one per settled bet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementRecord {
    pub id: String,
    pub bet_id: BetId,
    pub user_id: UserId,
    pub game: GameKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    pub bet_amount: Amount,
    pub payout_amount: Amount,
    pub result: GameOutcome,
    pub created_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn for_bet(bet: &Bet, payout_amount: Amount) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bet_id: bet.id.clone(),
            user_id: bet.user_id.clone(),
            game: bet.game,
            round_id: bet.round_id.clone(),
            bet_amount: bet.amount,
            payout_amount,
            result: GameOutcome::from_payout(payout_amount),
            created_at: Utc::now(),
        }
    }
}

/// Public view of a bet in the live aviator round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveBet {
    pub bet_id: BetId,
    pub user_id: UserId,
    pub amount: Amount,
    pub cashed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_out_multiplier: Option<Multiplier>,
}

impl From<&Bet> for LiveBet {
    fn from(bet: &Bet) -> Self {
        Self {
            bet_id: bet.id.clone(),
            user_id: bet.user_id.clone(),
            amount: bet.amount,
            cashed_out: bet.status == BetStatus::Won,
            cash_out_multiplier: bet.cash_out_multiplier(),
        }
    }
}
