//! Error types for ledger and round-engine operations.
//!
//! Every fallible operation returns one of these synchronously; nothing in the
//! state machine propagates panics across the engine boundary.

use crate::round::RoundStatus;
use uuid::Uuid;

/// Domain errors returned by [`crate::ledger::Ledger`] and
/// [`crate::engine::RoundEngine`] operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    #[error("Amount must be a positive number of minor units")]
    InvalidAmount,

    #[error("Insufficient balance: have {balance}, need {requested}")]
    InsufficientBalance { balance: u64, requested: u64 },

    #[error("Round {0} not found")]
    SessionNotFound(Uuid),

    #[error("Operation '{operation}' not allowed while round is {status}")]
    InvalidState {
        status: RoundStatus,
        operation: &'static str,
    },

    #[error("No bet placed in this round")]
    NoBet,

    #[error("Already cashed out in this round")]
    AlreadyCashedOut,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Failure reported by a persistence collaborator. Logged and swallowed by the
/// engine; never rolls back the state transition that triggered the write.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Persistence failed: {0}")]
pub struct PersistenceError(pub String);

pub type Result<T> = std::result::Result<T, GameError>;
