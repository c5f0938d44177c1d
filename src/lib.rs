//! Roundcore - round lifecycle and settlement engine for wagering games
//!
//! Runs a continuous crash game, a timed color draw and stepped reveal games
//! where many users bet concurrently. Rounds move through a forward-only state
//! machine, every bet is settled exactly once, and wallet balances are changed
//! only through serialized, audited debits and credits.

pub mod config;
pub mod errors;
pub mod events;
pub mod games;
pub mod ledger;
pub mod runtime;
pub mod scheduler;
pub mod sessions;
pub mod settlement;
pub mod storage;
pub mod tables;
pub mod wallet;

pub use config::{ConfigLoader, EngineConfig};
pub use errors::{ConfigError, EngineError, EngineResult};
pub use events::{EventBus, GameEvent};
pub use games::{
    Amount, Bet, BetStatus, GameKind, LiveBet, Multiplier, Round, RoundOutcome, RoundStatus,
    SettlementRecord,
};
pub use runtime::GameRuntime;
pub use settlement::{Resolution, SettlementEngine};
pub use wallet::WalletLedger;
