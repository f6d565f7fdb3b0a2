//! Player balances in fixed-point minor units.
//!
//! All monetary state is integer cents. Conversions floor, never round, so
//! every balance is reproducible from the operation history. Reserve and
//! credit are atomic per account: the balance check and the mutation happen
//! under the same map-entry guard, so no concurrent operation can satisfy a
//! reserve against a stale balance.

use crate::errors::{GameError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Monetary amount in integer minor units (cents).
pub type Amount = u64;

/// Minor units per whole currency unit.
pub const CENTS_PER_UNIT: u64 = 100;

/// Convert a display value to cents, truncating toward zero. Returns `None`
/// for non-finite or negative input.
pub fn to_cents(value: f64) -> Option<Amount> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * CENTS_PER_UNIT as f64).floor() as Amount)
}

/// Convert cents back to a display value. Display only; never fed back into
/// balance arithmetic.
pub fn display_units(amount: Amount) -> f64 {
    amount as f64 / CENTS_PER_UNIT as f64
}

/// One player account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: Amount,
}

/// Owns every account balance. Cheap to clone; clones share the same store.
#[derive(Clone, Default)]
pub struct Ledger {
    accounts: Arc<DashMap<String, Account>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently create a zero-balance account.
    pub fn ensure_account(&self, user_id: &str) {
        self.accounts
            .entry(user_id.to_string())
            .or_insert_with(|| Account {
                id: user_id.to_string(),
                balance: 0,
            });
    }

    /// Deduct `amount` from the account, failing if the balance cannot cover
    /// it. Returns the new balance.
    pub fn reserve(&self, user_id: &str, amount: Amount) -> Result<Amount> {
        if amount == 0 {
            return Err(GameError::InvalidAmount);
        }

        let mut account = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| Account {
                id: user_id.to_string(),
                balance: 0,
            });

        if account.balance < amount {
            return Err(GameError::InsufficientBalance {
                balance: account.balance,
                requested: amount,
            });
        }

        account.balance -= amount;
        Ok(account.balance)
    }

    /// Add `amount` to the account (zero allowed). Returns the new balance.
    pub fn credit(&self, user_id: &str, amount: Amount) -> Result<Amount> {
        let mut account = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| Account {
                id: user_id.to_string(),
                balance: 0,
            });

        account.balance = account.balance.saturating_add(amount);
        Ok(account.balance)
    }

    /// Apply a signed delta: positive credits, negative reserves. Deposit and
    /// withdrawal collaborators go through here.
    pub fn adjust(&self, user_id: &str, delta: i64) -> Result<Amount> {
        if delta >= 0 {
            self.credit(user_id, delta as Amount)
        } else {
            self.reserve(user_id, delta.unsigned_abs())
        }
    }

    pub fn balance(&self, user_id: &str) -> Amount {
        self.accounts.get(user_id).map_or(0, |a| a.balance)
    }

    /// Deterministically ordered snapshot of every balance, for the
    /// persistence sink.
    pub fn snapshot(&self) -> BTreeMap<String, Amount> {
        self.accounts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().balance))
            .collect()
    }
}
