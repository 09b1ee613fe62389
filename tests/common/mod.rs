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

//! Shared helpers for integration tests.

#![allow(dead_code)]

use inventory_ledger_rs::{
    ActorId, Journal, LedgerConfig, LocationId, ProductId, StockLedger, StorageError,
    ThresholdChange, Transaction, TransactionKind,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Predicate = Box<dyn Fn(&Transaction) -> bool + Send + Sync>;

/// In-memory journal that fails on demand.
#[derive(Clone, Default)]
pub struct FaultyJournal {
    predicate: Arc<Mutex<Option<Predicate>>>,
    written: Arc<Mutex<Vec<Transaction>>>,
    thresholds_offline: Arc<Mutex<bool>>,
    thresholds: Arc<Mutex<Vec<ThresholdChange>>>,
}

impl FaultyJournal {
    /// Rejects every append matching `predicate` from now on.
    pub fn fail_when(&self, predicate: impl Fn(&Transaction) -> bool + Send + Sync + 'static) {
        *self.predicate.lock() = Some(Box::new(predicate));
    }

    /// Rejects every threshold change from now on.
    pub fn fail_thresholds(&self) {
        *self.thresholds_offline.lock() = true;
    }

    pub fn heal(&self) {
        *self.predicate.lock() = None;
        *self.thresholds_offline.lock() = false;
    }

    pub fn written(&self) -> Vec<Transaction> {
        self.written.lock().clone()
    }

    pub fn thresholds(&self) -> Vec<ThresholdChange> {
        self.thresholds.lock().clone()
    }
}

impl fmt::Debug for FaultyJournal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyJournal")
            .field("written", &self.written.lock().len())
            .finish()
    }
}

impl Journal for FaultyJournal {
    fn append(&self, transaction: &Transaction) -> Result<(), StorageError> {
        if let Some(predicate) = self.predicate.lock().as_ref() {
            if predicate(transaction) {
                return Err(StorageError::Unavailable("injected fault".into()));
            }
        }
        self.written.lock().push(transaction.clone());
        Ok(())
    }

    fn record_threshold(&self, change: &ThresholdChange) -> Result<(), StorageError> {
        if *self.thresholds_offline.lock() {
            return Err(StorageError::Unavailable("injected fault".into()));
        }
        self.thresholds.lock().push(change.clone());
        Ok(())
    }
}

pub fn product(id: &str) -> ProductId {
    ProductId::from(id)
}

pub fn location(id: &str) -> LocationId {
    LocationId::from(id)
}

pub fn actor() -> ActorId {
    ActorId::from("ops")
}

/// Ledger holding `quantity` of P1 at KITCHEN with threshold 10.
pub fn kitchen_ledger(quantity: i64) -> Arc<StockLedger> {
    let ledger = Arc::new(StockLedger::new());
    stock(&ledger, "P1", "KITCHEN", quantity);
    ledger
}

/// Same as [`kitchen_ledger`] but writing through a [`FaultyJournal`].
pub fn journaled_kitchen_ledger(quantity: i64) -> (Arc<StockLedger>, FaultyJournal) {
    let journal = FaultyJournal::default();
    let ledger = Arc::new(StockLedger::with_journal(
        LedgerConfig::default(),
        journal.clone(),
    ));
    stock(&ledger, "P1", "KITCHEN", quantity);
    (ledger, journal)
}

pub fn stock(ledger: &StockLedger, product_id: &str, location_id: &str, quantity: i64) {
    ledger
        .adjust(
            &product(product_id),
            &location(location_id),
            quantity,
            TransactionKind::AdjustAdd,
            "opening count",
            &actor(),
        )
        .unwrap();
}

/// Replays a key's log from zero and returns the reconstructed quantity.
pub fn replayed_quantity(ledger: &StockLedger, product_id: &str, location_id: &str) -> u64 {
    let mut history: Vec<_> = ledger
        .log()
        .list_for(&product(product_id), &location(location_id), usize::MAX)
        .collect();
    history.reverse();
    history.iter().fold(0u64, |quantity, tx| {
        assert_eq!(tx.previous_quantity, quantity);
        quantity.checked_add_signed(tx.delta).unwrap()
    })
}
