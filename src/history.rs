//! Bounded append-only log of settled rounds.

use crate::round::HistoryRecord;
use std::collections::VecDeque;
use std::sync::RwLock;
use uuid::Uuid;

/// FIFO ring of settled-round records. Appends beyond capacity evict the
/// oldest record first; the log never exceeds its configured capacity.
pub struct HistoryLog {
    records: RwLock<VecDeque<HistoryRecord>>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&self, record: HistoryRecord) {
        let mut records = self.records.write().unwrap();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryRecord> {
        let records = self.records.read().unwrap();
        records.iter().rev().take(limit).cloned().collect()
    }

    /// Look up a settled round, e.g. for post-hoc fairness verification.
    pub fn find(&self, id: Uuid) -> Option<HistoryRecord> {
        let records = self.records.read().unwrap();
        records.iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
