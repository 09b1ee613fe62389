// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Append-only transaction log.
//!
//! Entries are indexed per stock key in append order. Because the ledger
//! serializes appends per key and never lets a key's timestamps run
//! backwards, append order per key is also timestamp order, with ties
//! broken by the insertion sequence number ([`TransactionId`]).

use crate::base::{LocationId, ProductId, StockKey, TransactionId};
use crate::error::{LedgerError, StorageError};
use crate::transaction::{ThresholdChange, Transaction};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Durable storage behind the log.
///
/// `append` must not return until the entry is durable; the log only
/// indexes an entry after its journal write succeeded. The same holds for
/// `record_threshold`: the ledger changes a threshold only once it is stored.
pub trait Journal: Send + Sync + fmt::Debug {
    fn append(&self, transaction: &Transaction) -> Result<(), StorageError>;

    fn record_threshold(&self, change: &ThresholdChange) -> Result<(), StorageError>;
}

type Entries = Arc<RwLock<Vec<Arc<Transaction>>>>;

/// Thread-safe, append-only transaction log.
///
/// Appends to different keys proceed in parallel; each key's entries live
/// behind their own lock.
#[derive(Debug, Default)]
pub struct TransactionLog {
    /// Entries per stock key, oldest first.
    by_key: DashMap<StockKey, Entries>,

    /// Last issued transaction id.
    last_id: AtomicU64,

    journal: Option<Box<dyn Journal>>,
}

impl TransactionLog {
    /// Creates an empty, memory-only log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty log that writes every entry through `journal`.
    pub fn with_journal(journal: impl Journal + 'static) -> Self {
        Self {
            journal: Some(Box::new(journal)),
            ..Self::default()
        }
    }

    /// Reserves the next transaction id.
    pub(crate) fn next_id(&self) -> TransactionId {
        TransactionId(self.last_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Appends a transaction.
    ///
    /// No business validation happens here; the ledger validates before
    /// appending.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageFailure`] if the journal rejects the
    /// write. The entry is then not part of the log.
    pub fn append(&self, transaction: Transaction) -> Result<Arc<Transaction>, LedgerError> {
        if let Some(journal) = &self.journal {
            journal
                .append(&transaction)
                .map_err(|cause| LedgerError::storage(&cause))?;
        }
        Ok(self.index(transaction))
    }

    /// Writes a threshold change through the journal, if there is one.
    pub(crate) fn record_threshold(&self, change: &ThresholdChange) -> Result<(), LedgerError> {
        match &self.journal {
            Some(journal) => journal
                .record_threshold(change)
                .map_err(|cause| LedgerError::storage(&cause)),
            None => Ok(()),
        }
    }

    /// Indexes an entry that is already durable (journal replay).
    pub(crate) fn restore(&self, transaction: Transaction) -> Arc<Transaction> {
        self.last_id.fetch_max(transaction.id.0, Ordering::Relaxed);
        self.index(transaction)
    }

    fn index(&self, transaction: Transaction) -> Arc<Transaction> {
        let entry = Arc::new(transaction);
        // Clone the per-key handle out so the map shard is not held while pushing.
        let entries = Arc::clone(self.by_key.entry(entry.key()).or_default().value());
        entries.write().push(Arc::clone(&entry));
        entry
    }

    /// Returns up to `limit` transactions for one stock record, newest first.
    ///
    /// The returned [`History`] is lazy: entries are read one at a time as
    /// it is advanced. It only covers entries that existed when it was
    /// created, so it is finite even under concurrent appends, and cloning
    /// it before advancing gives a restartable cursor.
    pub fn list_for(&self, product: &ProductId, location: &LocationId, limit: usize) -> History {
        let key = StockKey {
            location: location.clone(),
            product: product.clone(),
        };
        match self.by_key.get(&key) {
            Some(entries) => {
                let entries = Arc::clone(entries.value());
                let cursor = entries.read().len();
                History {
                    entries: Some(entries),
                    cursor,
                    remaining: limit,
                }
            }
            None => History::empty(),
        }
    }

    /// Every entry across all keys, ordered by transaction id.
    pub fn entries(&self) -> Vec<Arc<Transaction>> {
        let mut all: Vec<Arc<Transaction>> = self
            .by_key
            .iter()
            .flat_map(|entries| entries.value().read().clone())
            .collect();
        all.sort_by_key(|entry| entry.id);
        all
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.by_key.iter().map(|entries| entries.value().read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Newest-first cursor over one stock record's transactions.
#[derive(Debug, Clone)]
pub struct History {
    entries: Option<Entries>,
    /// Index one past the next entry to yield.
    cursor: usize,
    remaining: usize,
}

impl History {
    fn empty() -> Self {
        Self {
            entries: None,
            cursor: 0,
            remaining: 0,
        }
    }
}

impl Iterator for History {
    type Item = Arc<Transaction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.cursor == 0 {
            return None;
        }
        let entries = self.entries.as_ref()?;
        self.cursor -= 1;
        self.remaining -= 1;
        let entry = Arc::clone(&entries.read()[self.cursor]);
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.cursor.min(self.remaining);
        (len, Some(len))
    }
}

impl ExactSizeIterator for History {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ActorId;
    use crate::transaction::TransactionKind;
    use chrono::Utc;

    fn entry(log: &TransactionLog, product: &str, location: &str, previous: u64) -> Transaction {
        Transaction {
            id: log.next_id(),
            product: ProductId::from(product),
            location: LocationId::from(location),
            kind: TransactionKind::AdjustAdd,
            delta: 1,
            previous_quantity: previous,
            new_quantity: previous + 1,
            timestamp: Utc::now(),
            note: String::new(),
            actor: ActorId::from("test"),
        }
    }

    #[test]
    fn ids_increase() {
        let log = TransactionLog::new();
        assert_eq!(log.next_id(), TransactionId(1));
        assert_eq!(log.next_id(), TransactionId(2));
    }

    #[test]
    fn list_for_is_newest_first_and_limited() {
        let log = TransactionLog::new();
        for previous in 0..5 {
            log.append(entry(&log, "P1", "KITCHEN", previous)).unwrap();
        }
        log.append(entry(&log, "P1", "WAREHOUSE", 0)).unwrap();

        let quantities: Vec<u64> = log
            .list_for(&"P1".into(), &"KITCHEN".into(), 3)
            .map(|tx| tx.new_quantity)
            .collect();
        assert_eq!(quantities, vec![5, 4, 3]);
    }

    #[test]
    fn history_snapshot_ignores_later_appends() {
        let log = TransactionLog::new();
        log.append(entry(&log, "P1", "KITCHEN", 0)).unwrap();
        let history = log.list_for(&"P1".into(), &"KITCHEN".into(), 10);
        log.append(entry(&log, "P1", "KITCHEN", 1)).unwrap();
        assert_eq!(history.count(), 1);
    }

    #[test]
    fn history_is_restartable_by_clone() {
        let log = TransactionLog::new();
        for previous in 0..3 {
            log.append(entry(&log, "P1", "KITCHEN", previous)).unwrap();
        }
        let history = log.list_for(&"P1".into(), &"KITCHEN".into(), 10);
        let first: Vec<_> = history.clone().map(|tx| tx.id).collect();
        let second: Vec<_> = history.map(|tx| tx.id).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn unknown_key_yields_nothing() {
        let log = TransactionLog::new();
        let mut history = log.list_for(&"P1".into(), &"NOWHERE".into(), 10);
        assert_eq!(history.len(), 0);
        assert!(history.next().is_none());
    }

    #[test]
    fn entries_are_ordered_by_id_across_keys() {
        let log = TransactionLog::new();
        log.append(entry(&log, "P1", "KITCHEN", 0)).unwrap();
        log.append(entry(&log, "P2", "WAREHOUSE", 0)).unwrap();
        log.append(entry(&log, "P1", "KITCHEN", 1)).unwrap();

        let ids: Vec<u64> = log.entries().iter().map(|tx| tx.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(log.len(), 3);
        assert!(!log.is_empty());
    }

    #[test]
    fn restore_advances_id_sequence() {
        let log = TransactionLog::new();
        let mut restored = entry(&log, "P1", "KITCHEN", 0);
        restored.id = TransactionId(41);
        log.restore(restored);
        assert_eq!(log.next_id(), TransactionId(42));
    }

    #[derive(Debug)]
    struct BrokenJournal;

    impl Journal for BrokenJournal {
        fn append(&self, _: &Transaction) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }

        fn record_threshold(&self, _: &ThresholdChange) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn failed_journal_write_is_not_indexed() {
        let log = TransactionLog::with_journal(BrokenJournal);
        let result = log.append(entry(&log, "P1", "KITCHEN", 0));
        assert!(matches!(result, Err(LedgerError::StorageFailure { .. })));
        assert!(log.is_empty());
    }
}
