//! Round lifecycle orchestration.
//!
//! The engine is the only writer of round and ledger state. Each live round
//! owns a repeating tick task; bet and cashout requests arrive concurrently
//! from external callers. Every mutation of a round happens under that
//! round's mutex, which spans read-status, act, and mutate for the tick
//! handler and for cashout alike. That single lock is what makes the terminal
//! tick and an in-flight cashout mutually exclusive: a cashout either fully
//! completes before settlement observes its entry, or fails with
//! `InvalidState` because settlement has already run.
//!
//! No I/O happens inside a critical section. Event emission and persistence
//! run after the locks drop, and their failure never stalls a round.

use crate::config::EngineConfig;
use crate::entropy::{self, ClientSeedSource};
use crate::errors::{GameError, Result};
use crate::events::{EventBus, GameEvent};
use crate::fairness;
use crate::history::HistoryLog;
use crate::ledger::{Amount, Ledger};
use crate::persistence::PersistenceSink;
use crate::round::{HistoryRecord, Round, RoundSnapshot, RoundStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{interval, sleep, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Result of a successful cashout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CashoutReceipt {
    pub multiplier_centi: u64,
    pub payout: Amount,
}

/// Outcome of one pass of the running tick loop.
enum Tick {
    Progress(u64),
    Settled(Box<HistoryRecord>),
    Abort,
}

/// Orchestrates round creation, countdown, the live multiplier loop, bets,
/// cashouts, and settlement.
pub struct RoundEngine {
    config: EngineConfig,
    ledger: Ledger,
    rounds: DashMap<Uuid, Arc<Mutex<Round>>>,
    tasks: DashMap<Uuid, tokio::task::JoinHandle<()>>,
    history: HistoryLog,
    events: EventBus,
    seeds: ClientSeedSource,
    sink: Arc<dyn PersistenceSink>,
    server_seed: String,
    nonce: AtomicU64,
}

impl RoundEngine {
    pub fn new(
        config: EngineConfig,
        ledger: Ledger,
        sink: Arc<dyn PersistenceSink>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new(Self {
            events: EventBus::new(config.event_capacity),
            history: HistoryLog::new(config.history_capacity),
            seeds: ClientSeedSource::new(&config.entropy),
            server_seed: entropy::local_seed(),
            nonce: AtomicU64::new(0),
            rounds: DashMap::new(),
            tasks: DashMap::new(),
            config,
            ledger,
            sink,
        }))
    }

    /// Create a round with its outcome fixed up front. The client seed comes
    /// from the external entropy source, with a local random fallback, so
    /// creation never fails except on malformed input.
    pub async fn create_round(
        &self,
        channel: &str,
        creator: &str,
        round_length_ms: Option<u64>,
    ) -> Result<RoundSnapshot> {
        if channel.trim().is_empty() || creator.trim().is_empty() {
            return Err(GameError::InvalidInput(
                "channel and creator must be non-empty".to_string(),
            ));
        }
        let length = round_length_ms.unwrap_or(self.config.default_round_length_ms);
        if length == 0 {
            return Err(GameError::InvalidInput(
                "round length must be positive".to_string(),
            ));
        }

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        let client_seed = self.seeds.next_seed().await;
        let outcome = fairness::compute_outcome(&self.server_seed, &client_seed, nonce);

        let round = Round::new(
            channel,
            creator,
            &self.server_seed,
            client_seed.clone(),
            nonce,
            outcome,
            length,
        );
        let id = round.id;
        let snapshot = round.snapshot();
        self.rounds.insert(id, Arc::new(Mutex::new(round)));

        info!(round_id = %id, nonce, channel, "Round created");
        self.events.publish(GameEvent::RoundCreated {
            id,
            channel: channel.to_string(),
            client_seed,
        });

        Ok(snapshot)
    }

    /// Begin the countdown for a waiting round. Rejects any other status.
    pub fn start_round(self: &Arc<Self>, id: Uuid) -> Result<()> {
        let cell = self.round_cell(id)?;
        {
            let mut round = cell.lock().unwrap();
            round.advance(RoundStatus::Countdown, "start")?;
        }

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.run_round(id, cell).await;
        });
        self.tasks.insert(id, handle);
        Ok(())
    }

    /// Abort every live round task. Rounds stop where they are; nothing is
    /// force-settled.
    pub fn stop(&self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
    }

    /// Reserve the stake and fold it into the caller's entry. Bets are
    /// additive: repeated bets from one user combine into a single entry.
    /// The reservation and the entry update commit as one unit under the
    /// round lock.
    pub async fn place_bet(&self, id: Uuid, user: &str, amount: Amount) -> Result<Amount> {
        if user.trim().is_empty() {
            return Err(GameError::InvalidInput("user must be non-empty".to_string()));
        }
        if amount == 0 {
            return Err(GameError::InvalidAmount);
        }

        let cell = self.round_cell(id)?;
        let (total_bet, balance) = {
            let mut round = cell.lock().unwrap();
            if !round.status.accepts_bets() {
                return Err(GameError::InvalidState {
                    status: round.status,
                    operation: "bet",
                });
            }

            let balance = self.ledger.reserve(user, amount)?;
            let entry = round.entries.entry(user.to_string()).or_default();
            entry.total_bet = entry.total_bet.saturating_add(amount);
            (entry.total_bet, balance)
        };

        self.events.publish(GameEvent::BetPlaced {
            id,
            user: user.to_string(),
            amount,
            total_bet,
        });
        self.events.publish(GameEvent::BalanceChanged {
            user: user.to_string(),
            balance,
        });
        self.persist_accounts().await;

        Ok(total_bet)
    }

    /// Cash out at the most recently published multiplier. Legal only while
    /// the round is running and the curve has not yet reached the crash
    /// point; a second cashout for the same user always fails.
    pub async fn cashout(&self, id: Uuid, user: &str) -> Result<CashoutReceipt> {
        let cell = self.round_cell(id)?;
        let (receipt, balance) = {
            let mut round = cell.lock().unwrap();
            if round.status != RoundStatus::Running {
                return Err(GameError::InvalidState {
                    status: round.status,
                    operation: "cashout",
                });
            }
            if round.elapsed_ms() >= round.round_length_ms {
                // The curve already hit the crash point; the terminal tick
                // has not committed yet.
                return Err(GameError::InvalidState {
                    status: RoundStatus::Crashed,
                    operation: "cashout",
                });
            }

            let multiplier = round.last_multiplier_centi;
            let entry = round.entries.get_mut(user).ok_or(GameError::NoBet)?;
            if entry.cashed_out_at.is_some() {
                return Err(GameError::AlreadyCashedOut);
            }

            let payout = entry.payout_at(multiplier);
            entry.cashed_out_at = Some(multiplier);
            entry.payout = payout;
            let balance = self.ledger.credit(user, payout)?;

            (
                CashoutReceipt {
                    multiplier_centi: multiplier,
                    payout,
                },
                balance,
            )
        };

        self.events.publish(GameEvent::CashedOut {
            id,
            user: user.to_string(),
            multiplier_centi: receipt.multiplier_centi,
            payout: receipt.payout,
        });
        self.events.publish(GameEvent::BalanceChanged {
            user: user.to_string(),
            balance,
        });
        self.persist_accounts().await;

        Ok(receipt)
    }

    pub fn get_snapshot(&self, id: Uuid) -> Result<RoundSnapshot> {
        let cell = self.round_cell(id)?;
        let round = cell.lock().unwrap();
        Ok(round.snapshot())
    }

    pub fn list_active_rounds(&self) -> Vec<RoundSnapshot> {
        self.rounds
            .iter()
            .map(|entry| entry.value().lock().unwrap().snapshot())
            .collect()
    }

    pub fn ensure_account(&self, user: &str) {
        self.ledger.ensure_account(user);
    }

    pub fn balance(&self, user: &str) -> Amount {
        self.ledger.balance(user)
    }

    /// Deposit/withdraw seam: positive delta credits, negative reserves.
    pub async fn adjust_balance(&self, user: &str, delta: i64) -> Result<Amount> {
        let balance = self.ledger.adjust(user, delta)?;
        self.events.publish(GameEvent::BalanceChanged {
            user: user.to_string(),
            balance,
        });
        self.persist_accounts().await;
        Ok(balance)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    fn round_cell(&self, id: Uuid) -> Result<Arc<Mutex<Round>>> {
        self.rounds
            .get(&id)
            .map(|cell| Arc::clone(&cell))
            .ok_or(GameError::SessionNotFound(id))
    }

    /// Countdown, then the live multiplier loop, then settlement. Runs as a
    /// spawned task per round; external I/O failures are logged and the loop
    /// continues on schedule.
    async fn run_round(&self, id: Uuid, cell: Arc<Mutex<Round>>) {
        for remaining in (1..=self.config.countdown_ticks).rev() {
            self.events.publish(GameEvent::CountdownTick { id, remaining });
            sleep(self.config.countdown_interval()).await;
        }

        let crash_centi = {
            let mut round = cell.lock().unwrap();
            if round.advance(RoundStatus::Running, "tick").is_err() {
                warn!(round_id = %id, status = %round.status, "Round left countdown in unexpected status");
                return;
            }
            round.started_at = Some(Instant::now());
            round.last_multiplier_centi = 100;
            round.crash_centi
        };

        self.events.publish(GameEvent::RoundStarted {
            id,
            crash_centi: self.config.reveal_crash_on_start.then_some(crash_centi),
        });

        let mut ticker = interval(self.config.tick_interval());
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.advance_tick(&cell) {
                Tick::Progress(multiplier_centi) => {
                    self.events.publish(GameEvent::MultiplierTick {
                        id,
                        multiplier_centi,
                    });
                }
                Tick::Settled(record) => {
                    self.history.append((*record).clone());
                    self.rounds.remove(&id);
                    if let Err(err) = self.sink.append_history(&record).await {
                        warn!(round_id = %id, error = %err, "History persistence failed");
                    }
                    self.events.publish(GameEvent::RoundCrashed {
                        id,
                        crash_centi: record.crash_centi,
                    });
                    info!(
                        round_id = %id,
                        crash_centi = record.crash_centi,
                        entries = record.entries.len(),
                        "Round crashed and settled"
                    );
                    break;
                }
                Tick::Abort => break,
            }
        }

        self.tasks.remove(&id);
    }

    /// One tick: publish the current multiplier, or run the terminal
    /// settlement pass. Everything in here holds the round lock.
    fn advance_tick(&self, cell: &Arc<Mutex<Round>>) -> Tick {
        let mut round = cell.lock().unwrap();
        let elapsed = round.elapsed_ms();

        if elapsed < round.round_length_ms {
            let multiplier =
                multiplier_at(round.crash_centi, elapsed, round.round_length_ms);
            round.last_multiplier_centi = multiplier;
            return Tick::Progress(multiplier);
        }

        // Terminal tick. The status flip and the settlement pass commit
        // atomically with respect to any concurrent cashout.
        round.last_multiplier_centi = round.crash_centi;
        if round.advance(RoundStatus::Crashed, "tick").is_err() {
            return Tick::Abort;
        }
        for entry in round.entries.values_mut() {
            if entry.cashed_out_at.is_none() {
                entry.payout = 0;
            }
        }
        if round.advance(RoundStatus::Settled, "tick").is_err() {
            return Tick::Abort;
        }

        Tick::Settled(Box::new(round.to_history_record()))
    }

    async fn persist_accounts(&self) {
        if let Err(err) = self.sink.save_accounts(self.ledger.snapshot()).await {
            warn!(error = %err, "Account snapshot persistence failed");
        }
    }
}

/// Multiplier curve sampled from monotonic elapsed time:
/// `crash ^ (t / round_length)`, floored to hundredths. Sampling wall-clock
/// elapsed rather than counting ticks keeps a delayed tick from
/// desynchronizing the curve.
fn multiplier_at(crash_centi: u64, elapsed_ms: u64, round_length_ms: u64) -> u64 {
    let t = elapsed_ms.min(round_length_ms) as f64 / round_length_ms as f64;
    let crash = crash_centi as f64 / 100.0;
    let multiplier = (crash.powf(t) * 100.0).floor() as u64;
    multiplier.clamp(100, crash_centi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySink;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            countdown_ticks: 1,
            countdown_interval_ms: 10,
            tick_interval_ms: 10,
            default_round_length_ms: 100,
            ..Default::default()
        }
    }

    fn engine_with(config: EngineConfig) -> (Arc<RoundEngine>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let engine = RoundEngine::new(config, Ledger::new(), sink.clone()).unwrap();
        (engine, sink)
    }

    async fn wait_for_crash(rx: &mut tokio::sync::broadcast::Receiver<GameEvent>) {
        while let Ok(event) = rx.recv().await {
            if matches!(event, GameEvent::RoundCrashed { .. }) {
                return;
            }
        }
        panic!("event stream closed before RoundCrashed");
    }

    async fn wait_for_start(rx: &mut tokio::sync::broadcast::Receiver<GameEvent>) {
        while let Ok(event) = rx.recv().await {
            if matches!(event, GameEvent::RoundStarted { .. }) {
                return;
            }
        }
        panic!("event stream closed before RoundStarted");
    }

    #[test]
    fn test_multiplier_curve_endpoints() {
        assert_eq!(multiplier_at(300, 0, 8_000), 100);
        assert_eq!(multiplier_at(300, 8_000, 8_000), 300);
        assert_eq!(multiplier_at(300, 20_000, 8_000), 300);
        assert_eq!(multiplier_at(100, 4_000, 8_000), 100);
    }

    #[test]
    fn test_multiplier_curve_is_monotone() {
        let mut last = 0;
        for elapsed in (0..=8_000).step_by(100) {
            let m = multiplier_at(1_000, elapsed, 8_000);
            assert!(m >= last);
            last = m;
        }
    }

    #[tokio::test]
    async fn test_create_round_validates_input() {
        let (engine, _) = engine_with(quick_config());
        assert!(engine.create_round("", "alice", None).await.is_err());
        assert!(engine.create_round("lobby", " ", None).await.is_err());
        assert!(engine.create_round("lobby", "alice", Some(0)).await.is_err());
        assert!(engine.create_round("lobby", "alice", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_bet_reserves_and_accumulates() {
        let (engine, sink) = engine_with(quick_config());
        engine.adjust_balance("alice", 10_000).await.unwrap();

        let round = engine.create_round("lobby", "alice", None).await.unwrap();
        assert_eq!(engine.place_bet(round.id, "alice", 600).await.unwrap(), 600);
        assert_eq!(engine.place_bet(round.id, "alice", 400).await.unwrap(), 1_000);
        assert_eq!(engine.balance("alice"), 9_000);

        let snapshot = engine.get_snapshot(round.id).unwrap();
        assert_eq!(snapshot.entries["alice"].total_bet, 1_000);
        assert_eq!(sink.accounts().await.get("alice"), Some(&9_000));
    }

    #[tokio::test]
    async fn test_bet_failures_leave_no_entry() {
        let (engine, _) = engine_with(quick_config());
        engine.adjust_balance("bob", 100).await.unwrap();
        let round = engine.create_round("lobby", "bob", None).await.unwrap();

        assert_eq!(
            engine.place_bet(round.id, "bob", 0).await,
            Err(GameError::InvalidAmount)
        );
        assert!(matches!(
            engine.place_bet(round.id, "bob", 500).await,
            Err(GameError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            engine.place_bet(Uuid::new_v4(), "bob", 50).await,
            Err(GameError::SessionNotFound(_))
        ));

        let snapshot = engine.get_snapshot(round.id).unwrap();
        assert!(snapshot.entries.is_empty());
        assert_eq!(engine.balance("bob"), 100);
    }

    #[tokio::test]
    async fn test_concurrent_bets_from_one_user_both_land() {
        let (engine, _) = engine_with(quick_config());
        engine.adjust_balance("carol", 1_000).await.unwrap();
        let round = engine.create_round("lobby", "carol", None).await.unwrap();

        let (a, b) = tokio::join!(
            engine.place_bet(round.id, "carol", 500),
            engine.place_bet(round.id, "carol", 500),
        );
        a.unwrap();
        b.unwrap();

        let snapshot = engine.get_snapshot(round.id).unwrap();
        assert_eq!(snapshot.entries["carol"].total_bet, 1_000);
        assert_eq!(engine.balance("carol"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncashed_entries_settle_at_zero() {
        let (engine, sink) = engine_with(quick_config());
        engine.adjust_balance("alice", 10_000).await.unwrap();

        let round = engine
            .create_round("lobby", "alice", Some(100))
            .await
            .unwrap();
        engine.place_bet(round.id, "alice", 1_000).await.unwrap();

        let mut rx = engine.events().subscribe();
        engine.start_round(round.id).unwrap();
        wait_for_crash(&mut rx).await;

        // The stake stays reserved; nothing comes back.
        assert_eq!(engine.balance("alice"), 9_000);
        assert_eq!(engine.history().len(), 1);

        let record = &engine.history().recent(1)[0];
        let entry = &record.entries["alice"];
        assert_eq!(entry.payout, 0);
        assert!(entry.cashed_out_at.is_none());

        // Settled rounds leave the live set.
        assert!(matches!(
            engine.get_snapshot(round.id),
            Err(GameError::SessionNotFound(_))
        ));
        assert!(engine.list_active_rounds().is_empty());
        assert_eq!(sink.history_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cashout_pays_once() {
        let (engine, _) = engine_with(EngineConfig {
            default_round_length_ms: 10_000,
            ..quick_config()
        });
        engine.adjust_balance("alice", 10_000).await.unwrap();

        let round = engine.create_round("lobby", "alice", None).await.unwrap();
        engine.place_bet(round.id, "alice", 1_000).await.unwrap();

        let mut rx = engine.events().subscribe();
        engine.start_round(round.id).unwrap();
        wait_for_start(&mut rx).await;

        // Let a couple of multiplier ticks land first.
        let mut ticks = 0;
        while ticks < 2 {
            if let Ok(GameEvent::MultiplierTick { .. }) = rx.recv().await {
                ticks += 1;
            }
        }

        let receipt = engine.cashout(round.id, "alice").await.unwrap();
        assert_eq!(receipt.payout, 1_000 * receipt.multiplier_centi / 100);
        assert_eq!(engine.balance("alice"), 9_000 + receipt.payout);

        let snapshot = engine.get_snapshot(round.id).unwrap();
        assert_eq!(
            snapshot.entries["alice"].cashed_out_at,
            Some(receipt.multiplier_centi)
        );

        assert_eq!(
            engine.cashout(round.id, "alice").await,
            Err(GameError::AlreadyCashedOut)
        );
        assert_eq!(engine.balance("alice"), 9_000 + receipt.payout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bets_close_when_running_begins() {
        let (engine, _) = engine_with(EngineConfig {
            default_round_length_ms: 10_000,
            ..quick_config()
        });
        engine.adjust_balance("alice", 1_000).await.unwrap();

        let round = engine.create_round("lobby", "alice", None).await.unwrap();
        let mut rx = engine.events().subscribe();
        engine.start_round(round.id).unwrap();
        wait_for_start(&mut rx).await;

        assert!(matches!(
            engine.place_bet(round.id, "alice", 100).await,
            Err(GameError::InvalidState {
                status: RoundStatus::Running,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cashout_requires_running_round_and_bet() {
        let (engine, _) = engine_with(quick_config());
        engine.adjust_balance("alice", 1_000).await.unwrap();
        let round = engine.create_round("lobby", "alice", None).await.unwrap();

        // Still waiting: no cashouts yet.
        assert!(matches!(
            engine.cashout(round.id, "alice").await,
            Err(GameError::InvalidState {
                status: RoundStatus::Waiting,
                ..
            })
        ));
        assert!(matches!(
            engine.cashout(Uuid::new_v4(), "alice").await,
            Err(GameError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cashout_after_settlement() {
        let (engine, _) = engine_with(quick_config());
        engine.adjust_balance("alice", 1_000).await.unwrap();

        let round = engine
            .create_round("lobby", "alice", Some(100))
            .await
            .unwrap();
        engine.place_bet(round.id, "alice", 500).await.unwrap();

        let mut rx = engine.events().subscribe();
        engine.start_round(round.id).unwrap();
        wait_for_crash(&mut rx).await;

        // Whether the round is still visible or already evicted, no credit
        // can happen after the terminal tick committed.
        assert!(matches!(
            engine.cashout(round.id, "alice").await,
            Err(GameError::SessionNotFound(_)) | Err(GameError::InvalidState { .. })
        ));
        assert_eq!(engine.balance("alice"), 500);
    }

    #[tokio::test]
    async fn test_start_round_rejects_wrong_status() {
        let (engine, _) = engine_with(quick_config());
        let round = engine.create_round("lobby", "alice", None).await.unwrap();

        engine.start_round(round.id).unwrap();
        assert!(matches!(
            engine.start_round(round.id),
            Err(GameError::InvalidState { .. })
        ));
        assert!(matches!(
            engine.start_round(Uuid::new_v4()),
            Err(GameError::SessionNotFound(_))
        ));
    }
}
