pub mod types;
pub mod multiplier;
pub mod color;
pub mod round;
pub mod bet;

pub use types::*;
pub use multiplier::MultiplierEngine;
pub use round::{Round, RoundOrigin, RoundStatus};
pub use bet::{Bet, BetStatus, LiveBet, SettlementRecord, Wager};
