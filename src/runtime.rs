//! Game runtime
//!
//! Wires the stores, wallet, ledger and tables together, runs the periodic
//! tasks and exposes the operations the transport layer calls.

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::events::{EventBus, GameEvent};
use crate::games::color::ColorWager;
use crate::games::{
    Amount, Bet, GameFamily, GameKind, LiveBet, Round, RoundOutcome, RoundStatus, SettlementRecord,
};
use crate::ledger::BetLedger;
use crate::scheduler::RoundScheduler;
use crate::sessions::{SessionManager, StepResult};
use crate::settlement::SettlementEngine;
use crate::storage::{HistoryStore, InMemoryHistoryStore, InMemoryRoundStore, RoundStore};
use crate::tables::{AviatorTable, CashOut, ColorTable, CurrentRound, TablePhase};
use crate::wallet::{LedgerEntry, WalletLedger};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct GameRuntime {
    config: EngineConfig,
    wallet: Arc<WalletLedger>,
    history: Arc<dyn HistoryStore>,
    events: EventBus,
    scheduler: Arc<RoundScheduler>,
    sessions: SessionManager,
    aviator: Arc<AviatorTable>,
    color: Arc<ColorTable>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GameRuntime {
    /// Runtime backed by in-memory stores
    pub fn new(config: EngineConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryRoundStore::new()),
            Arc::new(InMemoryHistoryStore::new()),
        )
    }

    pub fn with_stores(
        config: EngineConfig,
        rounds: Arc<dyn RoundStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let events = EventBus::new(config.events.channel_capacity);
        let wallet = Arc::new(WalletLedger::new());
        let ledger = Arc::new(BetLedger::new());
        let settlement = Arc::new(SettlementEngine::new(
            Arc::clone(&wallet),
            Arc::clone(&ledger),
            Arc::clone(&history),
        ));
        let scheduler = Arc::new(RoundScheduler::new(
            config.clone(),
            rounds,
            Arc::clone(&settlement),
            events.clone(),
        ));
        let sessions = SessionManager::new(
            config.wallet.clone(),
            Arc::clone(&wallet),
            Arc::clone(&ledger),
            Arc::clone(&settlement),
            Arc::clone(&scheduler),
        );
        let aviator = Arc::new(AviatorTable::new(
            config.clone(),
            Arc::clone(&wallet),
            Arc::clone(&ledger),
            settlement,
            Arc::clone(&scheduler),
            events.clone(),
        ));
        let color = Arc::new(ColorTable::new(
            config.clone(),
            Arc::clone(&wallet),
            ledger,
            Arc::clone(&scheduler),
            events.clone(),
        ));

        Self {
            config,
            wallet,
            history,
            events,
            scheduler,
            sessions,
            aviator,
            color,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the activation sweep, both table loops and the event log sink
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("runtime already started");
            return;
        }

        tasks.push(tokio::spawn(
            Arc::clone(&self.scheduler).run(self.cancel.child_token()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.aviator).run(self.cancel.child_token()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.color).run(self.cancel.child_token()),
        ));
        tasks.push(self.events.spawn_tracing_sink(self.cancel.child_token()));
        info!(tasks = tasks.len(), "game runtime started");
    }

    /// Cancel the periodic tasks and wait for them to wind down
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("task ended abnormally: {}", e);
            }
        }
        info!("game runtime stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    // Wallet

    pub fn open_account(&self, user_id: &str, initial_balance: Amount) -> EngineResult<Amount> {
        self.wallet.open_account(user_id, initial_balance)
    }

    pub fn deposit(&self, user_id: &str, amount: Amount, reference: Option<&str>) -> EngineResult<Amount> {
        self.wallet.deposit(user_id, amount, reference)
    }

    pub fn balance(&self, user_id: &str) -> EngineResult<Amount> {
        self.wallet.balance(user_id)
    }

    pub fn wallet_entries(&self, user_id: &str) -> EngineResult<Vec<LedgerEntry>> {
        self.wallet.entries(user_id)
    }

    // Rounds

    pub async fn schedule_round(
        &self,
        game: GameKind,
        outcome: RoundOutcome,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> EngineResult<Round> {
        self.scheduler
            .schedule_round(game, outcome, start_time, end_time)
            .await
    }

    pub async fn delete_scheduled_round(&self, round_id: &str) -> EngineResult<Round> {
        self.scheduler.delete_scheduled_round(round_id).await
    }

    pub async fn list_rounds(
        &self,
        game: Option<GameKind>,
        status: Option<RoundStatus>,
    ) -> EngineResult<Vec<Round>> {
        self.scheduler.list_rounds(game, status).await
    }

    /// Open a live round on the game's table, optionally with a fixed outcome
    pub async fn create_round(
        &self,
        game: GameKind,
        explicit_outcome: Option<RoundOutcome>,
    ) -> EngineResult<Round> {
        let now = Utc::now();
        match game.family() {
            GameFamily::Continuous => self.aviator.start_round(now, explicit_outcome).await,
            GameFamily::Draw => self.color.start_round(now, explicit_outcome).await,
            GameFamily::Stepped => Err(EngineError::validation(format!(
                "{} is played in sessions, not live rounds",
                game
            ))),
        }
    }

    pub async fn get_current_round(&self, game: GameKind) -> EngineResult<Option<CurrentRound>> {
        let now = Utc::now();
        match game.family() {
            GameFamily::Continuous => Ok(self.aviator.current_round(now).await),
            GameFamily::Draw => Ok(self.color.current_round(now).await),
            GameFamily::Stepped => {
                let round = self.scheduler.covering_round(game, now).await?;
                Ok(round.map(|r| CurrentRound {
                    phase: if r.status == RoundStatus::Active {
                        TablePhase::Running
                    } else {
                        TablePhase::Waiting
                    },
                    seconds_left: r.seconds_left(now),
                    round_id: r.id,
                    game,
                    start_time: r.start_time,
                    end_time: r.end_time,
                    multiplier: None,
                    crash_point: None,
                }))
            }
        }
    }

    pub async fn get_game_history(&self, game: GameKind, limit: Option<usize>) -> EngineResult<Vec<Round>> {
        self.scheduler.game_history(game, limit).await
    }

    // Bets

    /// Start a stepped-game session
    pub async fn start_session(&self, user_id: &str, game: GameKind, amount: Amount) -> EngineResult<Bet> {
        self.sessions
            .start_session(user_id, game, amount, Utc::now())
            .await
    }

    pub async fn current_session(&self, user_id: &str, game: GameKind) -> Option<Bet> {
        self.sessions.current_session(user_id, game).await
    }

    pub async fn advance(&self, user_id: &str, game: GameKind) -> EngineResult<StepResult> {
        self.sessions.advance(user_id, game).await
    }

    pub async fn stop(&self, user_id: &str, game: GameKind, payout: Amount) -> EngineResult<Bet> {
        self.sessions.stop(user_id, game, payout).await
    }

    pub async fn collect(&self, user_id: &str, game: GameKind) -> EngineResult<Bet> {
        self.sessions.collect(user_id, game).await
    }

    /// Bet on the aviator round in flight
    pub async fn place_bet(&self, user_id: &str, amount: Amount) -> EngineResult<Bet> {
        self.aviator.place_bet(user_id, amount).await
    }

    pub async fn cash_out(&self, user_id: &str) -> EngineResult<CashOut> {
        self.aviator.cash_out(user_id).await
    }

    pub async fn place_color_bet(
        &self,
        user_id: &str,
        amount: Amount,
        wager: ColorWager,
    ) -> EngineResult<Bet> {
        self.color.place_bet(user_id, amount, wager, Utc::now()).await
    }

    pub async fn get_live_bets(&self) -> Vec<LiveBet> {
        self.aviator.live_bets().await
    }

    pub async fn get_top_bets(&self) -> Vec<LiveBet> {
        self.aviator.top_bets().await
    }

    pub async fn get_user_bets(
        &self,
        user_id: &str,
        game: Option<GameKind>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<SettlementRecord>> {
        let limit = limit.unwrap_or(self.config.scheduler.history_limit);
        self.history.for_user(user_id, game, limit).await
    }

    /// Handles for driving the tables by hand
    pub fn aviator(&self) -> &Arc<AviatorTable> {
        &self.aviator
    }

    pub fn color(&self) -> &Arc<ColorTable> {
        &self.color
    }

    pub fn scheduler(&self) -> &Arc<RoundScheduler> {
        &self.scheduler
    }
}
