//! Fire-and-forget game events
//!
//! Published on a broadcast channel for the external notification layer.
//! Delivery is at-most-once: publishing without subscribers is fine and a
//! lagging subscriber simply skips what it missed.

use crate::games::color::{Color, Size};
use crate::games::{Amount, GameKind, LiveBet, Multiplier, RoundId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Admin-scheduled round entered its window
    RoundActivated {
        round_id: RoundId,
        game: GameKind,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },

    /// Engine opened a new live round
    RoundStarted {
        round_id: RoundId,
        game: GameKind,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },

    MultiplierUpdate {
        round_id: RoundId,
        multiplier: Multiplier,
    },

    RoundCrashed {
        round_id: RoundId,
        crash_point: Multiplier,
    },

    RoundResult {
        round_id: RoundId,
        game: GameKind,
        winning_number: u8,
        color: Color,
        size: Size,
    },

    Countdown {
        round_id: RoundId,
        seconds_left: i64,
    },

    NewLiveBet {
        round_id: RoundId,
        bets: Vec<LiveBet>,
    },

    CashedOut {
        round_id: RoundId,
        user_id: UserId,
        multiplier: Multiplier,
        payout: Amount,
    },
}

/// Broadcast hub for [`GameEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send to current subscribers; never fails
    pub fn publish(&self, event: GameEvent) {
        if self.tx.send(event).is_err() {
            debug!("event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Log every event until cancelled
    pub fn spawn_tracing_sink(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("event sink lagged; skipped {} events", skipped);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                match serde_json::to_string(&event) {
                    Ok(json) => debug!(target: "roundcore::events", "{}", json),
                    Err(e) => warn!("failed to encode event: {}", e),
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
