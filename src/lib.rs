//! Moonshot - Provably Fair Crash Rounds
//!
//! Timed multiplayer "crash" betting rounds with a verifiable outcome
//! generator, a strict no-double-spend ledger, and a per-round tick loop that
//! settles every stake exactly once. Single-process, in-memory authority;
//! transport, rendering, and durable storage are external collaborators.

pub mod config;
pub mod engine;
pub mod entropy;
pub mod errors;
pub mod events;
pub mod fairness;
pub mod history;
pub mod ledger;
pub mod persistence;
pub mod round;

pub use config::{EngineConfig, EntropyConfig};
pub use engine::{CashoutReceipt, RoundEngine};
pub use errors::{GameError, PersistenceError, Result};
pub use events::{EventBus, GameEvent};
pub use history::HistoryLog;
pub use ledger::{Amount, Ledger};
pub use persistence::{MemorySink, PersistenceSink};
pub use round::{Entry, HistoryRecord, Round, RoundSnapshot, RoundStatus};
