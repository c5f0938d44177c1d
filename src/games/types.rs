use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;

/// Money in minor currency units
pub type Amount = u64;

/// Round identifier (UUID v4)
pub type RoundId = String;

/// Bet / session identifier (UUID v4)
pub type BetId = String;

/// Authenticated user identifier supplied by the auth collaborator
pub type UserId = String;

/// Supported game kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Aviator,
    Chicken,
    Mining,
    Color,
}

/// How a kind produces and resolves outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameFamily {
    /// Live multiplier that climbs until the crash point
    Continuous,
    /// Per-user reveal sequence
    Stepped,
    /// Timed round with a single draw
    Draw,
}

impl GameKind {
    pub const ALL: [GameKind; 4] = [
        GameKind::Aviator,
        GameKind::Chicken,
        GameKind::Mining,
        GameKind::Color,
    ];

    pub fn family(&self) -> GameFamily {
        match self {
            GameKind::Aviator => GameFamily::Continuous,
            GameKind::Chicken | GameKind::Mining => GameFamily::Stepped,
            GameKind::Color => GameFamily::Draw,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Aviator => "aviator",
            GameKind::Chicken => "chicken",
            GameKind::Mining => "mining",
            GameKind::Color => "color",
        }
    }

    /// Whether `outcome` has the shape this kind expects
    pub fn accepts(&self, outcome: &RoundOutcome) -> bool {
        matches!(
            (self, outcome),
            (GameKind::Aviator, RoundOutcome::CrashPoint(_))
                | (GameKind::Chicken, RoundOutcome::Steps(_))
                | (GameKind::Mining, RoundOutcome::Tiles(_))
                | (GameKind::Color, RoundOutcome::Number(_))
        )
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aviator" => Ok(GameKind::Aviator),
            "chicken" => Ok(GameKind::Chicken),
            "mining" => Ok(GameKind::Mining),
            "color" => Ok(GameKind::Color),
            other => Err(EngineError::validation(format!("unknown game type '{}'", other))),
        }
    }
}

/// Fixed-point multiplier in hundredths (`250` is 2.50x)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct Multiplier(pub u32);

impl Multiplier {
    pub const ZERO: Multiplier = Multiplier(0);
    pub const ONE: Multiplier = Multiplier(100);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `amount * self`, floored to whole minor units
    pub fn apply(&self, amount: Amount) -> Amount {
        amount.saturating_mul(self.0 as u64) / 100
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Immutable outcome data fixed when a round is created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RoundOutcome {
    CrashPoint(Multiplier),
    /// Multiplier sequence ending in a terminal zero
    Steps(Vec<Multiplier>),
    /// Mine board reveal order, a permutation of 1..=24
    Tiles(Vec<u32>),
    /// Winning number of a color draw
    Number(u8),
}

impl RoundOutcome {
    pub fn crash_point(&self) -> Option<Multiplier> {
        match self {
            RoundOutcome::CrashPoint(m) => Some(*m),
            _ => None,
        }
    }

    pub fn winning_number(&self) -> Option<u8> {
        match self {
            RoundOutcome::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Final result of a settled bet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    Win,
    Loss,
}

impl GameOutcome {
    pub fn from_payout(payout: Amount) -> Self {
        if payout > 0 {
            GameOutcome::Win
        } else {
            GameOutcome::Loss
        }
    }
}
