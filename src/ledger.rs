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

//! Per-location stock ledger.
//!
//! The [`StockLedger`] is the single source of truth for the current
//! quantity of each product at each location. [`StockLedger::adjust`] is the
//! only mutation entry point: it updates the record and appends exactly one
//! [`Transaction`] inside the same critical section.
//!
//! # Thread Safety
//!
//! Records live in a [`DashMap`], each behind its own [`Mutex`]. Adjustments
//! to the same (product, location) are serialized; adjustments to different
//! keys proceed in parallel. Operations that lock several records do so in
//! [`StockKey`] order.

use crate::base::{ActorId, LocationId, ProductId, StockKey};
use crate::error::LedgerError;
use crate::transaction::{ThresholdChange, Transaction, TransactionKind};
use crate::transaction_log::{Journal, TransactionLog};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stock classification against a record's low-stock threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

impl StockStatus {
    pub fn classify(quantity: u64, low_stock_threshold: u64) -> Self {
        if quantity == 0 {
            Self::OutOfStock
        } else if quantity <= low_stock_threshold {
            Self::LowStock
        } else {
            Self::InStock
        }
    }
}

/// A product's stock at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockRecord {
    pub product: ProductId,
    pub location: LocationId,
    pub quantity: u64,
    pub low_stock_threshold: u64,
    /// Timestamp of the last applied transaction.
    pub updated_at: Option<DateTime<Utc>>,
}

impl StockRecord {
    fn empty(key: &StockKey, low_stock_threshold: u64) -> Self {
        Self {
            product: key.product.clone(),
            location: key.location.clone(),
            quantity: 0,
            low_stock_threshold,
            updated_at: None,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            location: self.location.clone(),
            product: self.product.clone(),
        }
    }

    pub fn status(&self) -> StockStatus {
        StockStatus::classify(self.quantity, self.low_stock_threshold)
    }
}

/// Ledger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Threshold given to records the ledger creates implicitly.
    pub default_low_stock_threshold: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_low_stock_threshold: 10,
        }
    }
}

pub(crate) type RecordEntry = Arc<Mutex<StockRecord>>;

/// Authoritative current-quantity store per (product, location).
///
/// # Invariants
///
/// - A record's quantity never goes negative; decrements that would cross
///   zero fail with [`LedgerError::InsufficientStock`] and change nothing.
/// - Every successful adjustment appends exactly one transaction, and the
///   transaction's `new_quantity` is the record's quantity after it.
/// - A missing record reads as quantity zero. Records are created by the
///   first successful credit or threshold change and are never removed; a
///   failed operation never leaves an empty record behind.
#[derive(Debug, Default)]
pub struct StockLedger {
    records: DashMap<StockKey, RecordEntry>,
    log: TransactionLog,
    config: LedgerConfig,
}

impl StockLedger {
    /// Creates an empty, memory-only ledger with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Creates an empty ledger whose log writes through `journal`.
    pub fn with_journal(config: LedgerConfig, journal: impl Journal + 'static) -> Self {
        Self {
            records: DashMap::new(),
            log: TransactionLog::with_journal(journal),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The transaction history behind this ledger.
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Current quantity, or zero if the product was never stocked here.
    pub fn get_quantity(&self, product: &ProductId, location: &LocationId) -> u64 {
        self.existing(&key_of(product, location))
            .map_or(0, |entry| entry.lock().quantity)
    }

    /// Classifies current stock against the record's low-stock threshold.
    ///
    /// A missing record is [`StockStatus::OutOfStock`].
    pub fn classify(&self, product: &ProductId, location: &LocationId) -> StockStatus {
        self.record(product, location)
            .map_or(StockStatus::OutOfStock, |record| record.status())
    }

    /// Snapshot of one record.
    pub fn record(&self, product: &ProductId, location: &LocationId) -> Option<StockRecord> {
        self.existing(&key_of(product, location))
            .map(|entry| entry.lock().clone())
    }

    /// Snapshot of every record, sorted by location then product.
    pub fn records(&self) -> Vec<StockRecord> {
        let entries: Vec<RecordEntry> = self
            .records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut records: Vec<StockRecord> =
            entries.iter().map(|entry| entry.lock().clone()).collect();
        records.sort_by_key(StockRecord::key);
        records
    }

    /// Records currently low on stock or out of stock.
    pub fn alerts(&self) -> Vec<StockRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.status() != StockStatus::InStock)
            .collect()
    }

    /// Sum of a product's quantity across all locations.
    ///
    /// The product's records are locked together in [`StockKey`] order, so
    /// a concurrent transfer is counted either fully or not at all.
    pub fn total_quantity(&self, product: &ProductId) -> u64 {
        loop {
            let entries = self.entries_for(product);
            let guards: Vec<_> = entries.iter().map(|entry| entry.lock()).collect();
            // A transfer may have created a destination after the keys were read.
            if self.entries_for(product).len() == guards.len() {
                return guards.iter().map(|record| record.quantity).sum();
            }
        }
    }

    /// Sets the low-stock threshold, creating an empty record if needed.
    ///
    /// This is not a stock mutation: no [`Transaction`] is logged, but the
    /// change is written to the journal so a restart restores it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageFailure`] if the journal rejects the
    /// change. The threshold is then unchanged and no record is created.
    pub fn set_low_stock_threshold(
        &self,
        product: &ProductId,
        location: &LocationId,
        threshold: u64,
        actor: &ActorId,
    ) -> Result<(), LedgerError> {
        let key = key_of(product, location);
        let update = |record: &mut StockRecord| -> Result<(), LedgerError> {
            self.log.record_threshold(&ThresholdChange {
                product: product.clone(),
                location: location.clone(),
                low_stock_threshold: threshold,
                timestamp: Utc::now(),
                actor: actor.clone(),
            })?;
            record.low_stock_threshold = threshold;
            tracing::debug!(%product, %location, threshold, "low-stock threshold set");
            Ok(())
        };
        loop {
            if let Some(entry) = self.existing(&key) {
                return update(&mut *entry.lock());
            }
            if let Some(result) = self.create_with(&key, &update) {
                return result;
            }
        }
    }

    /// Applies a signed quantity change and logs it.
    ///
    /// Positive deltas require a credit kind (`AdjustAdd`, `TransferIn`,
    /// `ProductionIntake`); negative deltas require a debit kind. The record
    /// is created on its first successful credit; a credit that fails leaves
    /// no record behind.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidQuantity`] - `delta` is zero.
    /// - [`LedgerError::DeltaKindMismatch`] - sign of `delta` contradicts `kind`.
    /// - [`LedgerError::InsufficientStock`] - the decrement exceeds current stock.
    ///   This never clamps; callers decide whether to retry with less.
    /// - [`LedgerError::QuantityOverflow`] - the credit overflows `u64`.
    /// - [`LedgerError::StorageFailure`] - the log could not be written; the
    ///   quantity is unchanged.
    pub fn adjust(
        &self,
        product: &ProductId,
        location: &LocationId,
        delta: i64,
        kind: TransactionKind,
        note: &str,
        actor: &ActorId,
    ) -> Result<Arc<Transaction>, LedgerError> {
        check_delta(delta, kind)?;
        let key = key_of(product, location);
        // Records are never removed, so this runs at most twice.
        loop {
            if let Some(entry) = self.existing(&key) {
                let mut record = entry.lock();
                return self.apply(&mut record, delta, kind, note, actor);
            }
            if delta < 0 {
                return Err(LedgerError::InsufficientStock {
                    product: key.product,
                    location: key.location,
                    requested: delta.unsigned_abs(),
                    available: 0,
                });
            }
            if let Some(result) =
                self.create_with(&key, |record| self.apply(record, delta, kind, note, actor))
            {
                return result;
            }
        }
    }

    /// Rebuilds quantities from journal entries, oldest first.
    ///
    /// Meant for a freshly built ledger at startup. Entries are indexed in
    /// the log without being journaled again.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::JournalMismatch`] at the first entry that does
    /// not continue from the quantity reconstructed so far.
    pub fn replay(
        &self,
        entries: impl IntoIterator<Item = Transaction>,
    ) -> Result<usize, LedgerError> {
        let mut replayed = 0;
        for transaction in entries {
            let entry = self.entry(&transaction.key());
            let mut record = entry.lock();
            if !transaction.is_consistent() || record.quantity != transaction.previous_quantity {
                return Err(LedgerError::JournalMismatch {
                    transaction: transaction.id,
                });
            }
            record.quantity = transaction.new_quantity;
            record.updated_at = Some(
                record
                    .updated_at
                    .map_or(transaction.timestamp, |last| last.max(transaction.timestamp)),
            );
            self.log.restore(transaction);
            replayed += 1;
        }
        tracing::info!(replayed, "ledger rebuilt from journal");
        Ok(replayed)
    }

    /// Restores low-stock thresholds from journaled changes, oldest first.
    ///
    /// The last change per record wins. Like [`replay`](Self::replay), this
    /// writes nothing back to the journal.
    pub fn replay_thresholds(&self, changes: impl IntoIterator<Item = ThresholdChange>) -> usize {
        let mut restored = 0;
        for change in changes {
            self.entry(&change.key()).lock().low_stock_threshold = change.low_stock_threshold;
            restored += 1;
        }
        tracing::info!(restored, "thresholds restored from journal");
        restored
    }

    /// Looks up a record without creating it.
    pub(crate) fn existing(&self, key: &StockKey) -> Option<RecordEntry> {
        self.records.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Looks up a record, creating an empty one if absent.
    pub(crate) fn entry(&self, key: &StockKey) -> RecordEntry {
        let threshold = self.config.default_low_stock_threshold;
        // Clone the handle out so the map shard is released before locking the record.
        Arc::clone(
            self.records
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(StockRecord::empty(key, threshold))))
                .value(),
        )
    }

    /// Creates a record only if `init` succeeds on it.
    ///
    /// `init` runs on a fresh empty record while the map slot is reserved;
    /// it must not touch `self.records`. Returns `None` without calling
    /// `init` if the record already exists.
    pub(crate) fn create_with<T>(
        &self,
        key: &StockKey,
        init: impl FnOnce(&mut StockRecord) -> Result<T, LedgerError>,
    ) -> Option<Result<T, LedgerError>> {
        let Entry::Vacant(slot) = self.records.entry(key.clone()) else {
            return None;
        };
        let mut record = StockRecord::empty(key, self.config.default_low_stock_threshold);
        let result = init(&mut record);
        if result.is_ok() {
            slot.insert(Arc::new(Mutex::new(record)));
        }
        Some(result)
    }

    /// A product's records, sorted by key.
    fn entries_for(&self, product: &ProductId) -> Vec<RecordEntry> {
        let mut entries: Vec<(StockKey, RecordEntry)> = self
            .records
            .iter()
            .filter(|entry| &entry.key().product == product)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Read-modify-append on a record the caller has locked.
    pub(crate) fn apply(
        &self,
        record: &mut StockRecord,
        delta: i64,
        kind: TransactionKind,
        note: &str,
        actor: &ActorId,
    ) -> Result<Arc<Transaction>, LedgerError> {
        check_delta(delta, kind)?;

        let previous_quantity = record.quantity;
        let new_quantity = if delta < 0 {
            previous_quantity
                .checked_sub(delta.unsigned_abs())
                .ok_or_else(|| LedgerError::InsufficientStock {
                    product: record.product.clone(),
                    location: record.location.clone(),
                    requested: delta.unsigned_abs(),
                    available: previous_quantity,
                })?
        } else {
            previous_quantity
                .checked_add(delta.unsigned_abs())
                .ok_or(LedgerError::QuantityOverflow)?
        };

        // A key's timestamps never run backwards, even if the clock does.
        let now = Utc::now();
        let timestamp = record.updated_at.map_or(now, |last| last.max(now));

        let transaction = Transaction {
            id: self.log.next_id(),
            product: record.product.clone(),
            location: record.location.clone(),
            kind,
            delta,
            previous_quantity,
            new_quantity,
            timestamp,
            note: note.to_owned(),
            actor: actor.clone(),
        };
        let entry = self.log.append(transaction)?;

        record.quantity = new_quantity;
        record.updated_at = Some(timestamp);
        debug_assert!(entry.is_consistent());

        tracing::debug!(
            id = %entry.id,
            product = %record.product,
            location = %record.location,
            %kind,
            delta,
            quantity = new_quantity,
            "stock adjusted"
        );
        Ok(entry)
    }
}

fn key_of(product: &ProductId, location: &LocationId) -> StockKey {
    StockKey {
        location: location.clone(),
        product: product.clone(),
    }
}

fn check_delta(delta: i64, kind: TransactionKind) -> Result<(), LedgerError> {
    if delta == 0 {
        return Err(LedgerError::InvalidQuantity);
    }
    if kind.is_credit() != (delta > 0) {
        return Err(LedgerError::DeltaKindMismatch { kind, delta });
    }
    Ok(())
}
