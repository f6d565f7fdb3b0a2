//! Round data model: lifecycle status, per-player entries, snapshots, and
//! settled-round history records.

use crate::errors::{GameError, Result};
use crate::fairness::Outcome;
use crate::ledger::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// Round lifecycle. Transitions only move forward; there is no path backward
/// and no skipping states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Waiting,
    Countdown,
    Running,
    Crashed,
    Settled,
}

impl RoundStatus {
    /// Bets are accepted before the round starts running.
    pub fn accepts_bets(&self) -> bool {
        matches!(self, RoundStatus::Waiting | RoundStatus::Countdown)
    }

    /// The round has reached its terminal accounting pass.
    pub fn is_over(&self) -> bool {
        matches!(self, RoundStatus::Crashed | RoundStatus::Settled)
    }

    fn can_advance_to(&self, next: RoundStatus) -> bool {
        matches!(
            (self, next),
            (RoundStatus::Waiting, RoundStatus::Countdown)
                | (RoundStatus::Countdown, RoundStatus::Running)
                | (RoundStatus::Running, RoundStatus::Crashed)
                | (RoundStatus::Crashed, RoundStatus::Settled)
        )
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Waiting => write!(f, "waiting"),
            RoundStatus::Countdown => write!(f, "countdown"),
            RoundStatus::Running => write!(f, "running"),
            RoundStatus::Crashed => write!(f, "crashed"),
            RoundStatus::Settled => write!(f, "settled"),
        }
    }
}

/// One player's stake and outcome state within a round.
///
/// `total_bet` mirrors the sum of successful ledger reservations exactly; a
/// bet only accumulates here after its reservation succeeded. `cashed_out_at`
/// is set at most once. `payout` stays zero until cashout or settlement
/// resolves it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    pub total_bet: Amount,
    pub cashed_out_at: Option<u64>,
    pub payout: Amount,
}

impl Entry {
    /// Payout for this stake at a multiplier in hundredths, floored to whole
    /// cents.
    pub fn payout_at(&self, multiplier_centi: u64) -> Amount {
        let raw = self.total_bet as u128 * multiplier_centi as u128 / 100;
        raw.min(Amount::MAX as u128) as Amount
    }
}

/// One live game instance. The immutable outcome is fixed at creation; the
/// engine is the only writer of the mutable fields.
#[derive(Debug)]
pub struct Round {
    pub id: Uuid,
    pub channel: String,
    pub creator: String,
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub outcome_hex: String,
    pub outcome_float: f64,
    pub crash_centi: u64,
    pub status: RoundStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<Instant>,
    pub round_length_ms: u64,
    pub entries: HashMap<String, Entry>,
    pub last_multiplier_centi: u64,
}

impl Round {
    pub fn new(
        channel: &str,
        creator: &str,
        server_seed: &str,
        client_seed: String,
        nonce: u64,
        outcome: Outcome,
        round_length_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            creator: creator.to_string(),
            server_seed: server_seed.to_string(),
            client_seed,
            nonce,
            outcome_hex: outcome.hex,
            outcome_float: outcome.float,
            crash_centi: outcome.crash_centi,
            status: RoundStatus::Waiting,
            created_at: Utc::now(),
            started_at: None,
            round_length_ms,
            entries: HashMap::new(),
            last_multiplier_centi: 100,
        }
    }

    /// Advance the lifecycle one step forward, rejecting any transition that
    /// is not the immediate successor of the current status.
    pub fn advance(&mut self, next: RoundStatus, operation: &'static str) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(GameError::InvalidState {
                status: self.status,
                operation,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Monotonic milliseconds since the round entered Running.
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at
            .map_or(0, |started| started.elapsed().as_millis() as u64)
    }

    /// Read-only view for observers. Outcome data (server seed and digest)
    /// is withheld until the round is over: the digest alone determines the
    /// crash point.
    pub fn snapshot(&self) -> RoundSnapshot {
        let over = self.status.is_over();
        RoundSnapshot {
            id: self.id,
            channel: self.channel.clone(),
            creator: self.creator.clone(),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
            status: self.status,
            created_at: self.created_at,
            round_length_ms: self.round_length_ms,
            last_multiplier_centi: self.last_multiplier_centi,
            entries: self.entries.clone(),
            crash_centi: over.then_some(self.crash_centi),
            server_seed: over.then(|| self.server_seed.clone()),
            outcome_hex: over.then(|| self.outcome_hex.clone()),
        }
    }

    /// Immutable settled-round record for the history log. Call only after
    /// settlement has resolved every entry.
    pub fn to_history_record(&self) -> HistoryRecord {
        HistoryRecord {
            id: self.id,
            channel: self.channel.clone(),
            creator: self.creator.clone(),
            server_seed: self.server_seed.clone(),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
            outcome_hex: self.outcome_hex.clone(),
            outcome_float: self.outcome_float,
            crash_centi: self.crash_centi,
            entries: self.entries.clone(),
            created_at: self.created_at,
            settled_at: Utc::now(),
        }
    }
}

/// Serializable read-only view of a live round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub id: Uuid,
    pub channel: String,
    pub creator: String,
    pub client_seed: String,
    pub nonce: u64,
    pub status: RoundStatus,
    pub created_at: DateTime<Utc>,
    pub round_length_ms: u64,
    pub last_multiplier_centi: u64,
    pub entries: HashMap<String, Entry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_centi: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_hex: Option<String>,
}

/// Immutable snapshot of a settled round. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub channel: String,
    pub creator: String,
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub outcome_hex: String,
    pub outcome_float: f64,
    pub crash_centi: u64,
    pub entries: HashMap<String, Entry>,
    pub created_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
}
