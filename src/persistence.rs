//! Durability collaborator seam.
//!
//! The engine pushes account snapshots after every balance-affecting
//! operation and history records after every settlement. Writes happen
//! outside all critical sections; a failing sink is logged and never blocks
//! or rolls back round progression.

use crate::errors::PersistenceError;
use crate::ledger::Amount;
use crate::round::HistoryRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// External persistence collaborator.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save_accounts(
        &self,
        snapshot: BTreeMap<String, Amount>,
    ) -> Result<(), PersistenceError>;

    async fn append_history(&self, record: &HistoryRecord) -> Result<(), PersistenceError>;
}

/// In-memory sink. Default collaborator for single-process deployments and
/// the test double everywhere else.
#[derive(Default)]
pub struct MemorySink {
    accounts: RwLock<BTreeMap<String, Amount>>,
    history: RwLock<Vec<HistoryRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn accounts(&self) -> BTreeMap<String, Amount> {
        self.accounts.read().await.clone()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn save_accounts(
        &self,
        snapshot: BTreeMap<String, Amount>,
    ) -> Result<(), PersistenceError> {
        *self.accounts.write().await = snapshot;
        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> Result<(), PersistenceError> {
        self.history.write().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness;
    use crate::round::Round;

    #[tokio::test]
    async fn test_memory_sink_stores_latest_snapshot() {
        let sink = MemorySink::new();

        let mut snapshot = BTreeMap::new();
        snapshot.insert("alice".to_string(), 100);
        sink.save_accounts(snapshot.clone()).await.unwrap();

        snapshot.insert("alice".to_string(), 250);
        sink.save_accounts(snapshot).await.unwrap();

        assert_eq!(sink.accounts().await.get("alice"), Some(&250));
    }

    #[tokio::test]
    async fn test_memory_sink_appends_history() {
        let sink = MemorySink::new();
        let outcome = fairness::compute_outcome("s", "c", 1);
        let record =
            Round::new("ch", "cr", "s", "c".to_string(), 1, outcome, 8_000).to_history_record();

        sink.append_history(&record).await.unwrap();
        sink.append_history(&record).await.unwrap();
        assert_eq!(sink.history_len().await, 2);
    }
}
