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

//! Stock transfers between locations.
//!
//! A transfer is two ledger transactions, `transfer-out` at the source and
//! `transfer-in` at the destination, applied while both records are locked.
//! No caller can observe one leg without the other. If the destination leg
//! fails, the source leg is reversed before the error is returned.
//!
//! A destination the product was never stocked at is built off to the side
//! and only inserted into the ledger after both legs succeed, so a failed
//! transfer never leaves an empty destination record.

use crate::base::{ActorId, LocationId, ProductId, StockKey};
use crate::error::LedgerError;
use crate::ledger::{RecordEntry, StockLedger, StockRecord};
use crate::transaction::{Transaction, TransactionKind};
use parking_lot::MutexGuard;
use std::sync::Arc;

/// Note attached to the compensating entry of a failed transfer.
pub const TRANSFER_ROLLBACK_NOTE: &str = "transfer rollback";

/// The paired transactions of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOperation {
    pub product: ProductId,
    pub source: LocationId,
    pub destination: LocationId,
    pub quantity: u64,
    pub outbound: Arc<Transaction>,
    pub inbound: Arc<Transaction>,
}

impl TransferOperation {
    /// Sum of both legs' deltas. Always zero.
    pub fn net_delta(&self) -> i64 {
        self.outbound.delta + self.inbound.delta
    }
}

/// Moves stock between locations as one all-or-nothing operation.
#[derive(Debug, Clone)]
pub struct TransferCoordinator {
    ledger: Arc<StockLedger>,
}

impl TransferCoordinator {
    pub fn new(ledger: Arc<StockLedger>) -> Self {
        Self { ledger }
    }

    /// Moves `quantity` units of `product` from `source` to `destination`.
    ///
    /// Total stock of the product across locations is unchanged by a
    /// successful transfer. The destination record is created if the
    /// product was never stocked there, but only when the transfer succeeds.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidQuantity`] - `quantity` is zero.
    /// - [`LedgerError::SameLocation`] - `source == destination`.
    /// - [`LedgerError::InsufficientStock`] - source holds less than `quantity`.
    ///   Nothing is mutated.
    /// - [`LedgerError::StorageFailure`] - a leg could not be logged. If the
    ///   source leg had already been applied it is reversed first; if that
    ///   reversal also fails the error requires manual reconciliation.
    pub fn transfer(
        &self,
        product: &ProductId,
        source: &LocationId,
        destination: &LocationId,
        quantity: u64,
        actor: &ActorId,
        note: &str,
    ) -> Result<TransferOperation, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        if source == destination {
            return Err(LedgerError::SameLocation);
        }
        let delta = i64::try_from(quantity).map_err(|_| LedgerError::QuantityOverflow)?;

        let reject = |available: u64| {
            tracing::warn!(%product, %source, %destination, quantity, available, "transfer rejected");
            LedgerError::InsufficientStock {
                product: product.clone(),
                location: source.clone(),
                requested: quantity,
                available,
            }
        };

        let source_key = StockKey::new(product.clone(), source.clone());
        let destination_key = StockKey::new(product.clone(), destination.clone());

        // Records are never removed, so this runs at most twice.
        let (outbound, inbound) = loop {
            let source_entry = self
                .ledger
                .existing(&source_key)
                .ok_or_else(|| reject(0))?;

            if let Some(destination_entry) = self.ledger.existing(&destination_key) {
                let (mut from, mut to) = lock_in_order(
                    (&source_key, &source_entry),
                    (&destination_key, &destination_entry),
                );
                if from.quantity < quantity {
                    return Err(reject(from.quantity));
                }
                break self.move_stock(&mut from, &mut to, delta, note, actor)?;
            }

            // First stock at the destination: its record is published only
            // once both legs are logged.
            let mut from = source_entry.lock();
            if from.quantity < quantity {
                return Err(reject(from.quantity));
            }
            if let Some(legs) = self.ledger.create_with(&destination_key, |to| {
                self.move_stock(&mut from, to, delta, note, actor)
            }) {
                break legs?;
            }
        };

        tracing::info!(
            %product,
            %source,
            %destination,
            quantity,
            outbound = %outbound.id,
            inbound = %inbound.id,
            "stock transferred"
        );

        Ok(TransferOperation {
            product: product.clone(),
            source: source.clone(),
            destination: destination.clone(),
            quantity,
            outbound,
            inbound,
        })
    }

    /// Applies both legs to locked records.
    ///
    /// If the destination leg fails, the source leg is reversed and the
    /// destination error returned.
    fn move_stock(
        &self,
        from: &mut StockRecord,
        to: &mut StockRecord,
        delta: i64,
        note: &str,
        actor: &ActorId,
    ) -> Result<(Arc<Transaction>, Arc<Transaction>), LedgerError> {
        let outbound = self
            .ledger
            .apply(from, -delta, TransactionKind::TransferOut, note, actor)?;
        match self
            .ledger
            .apply(to, delta, TransactionKind::TransferIn, note, actor)
        {
            Ok(inbound) => Ok((outbound, inbound)),
            Err(err) => {
                self.compensate(from, delta, actor)?;
                Err(err)
            }
        }
    }

    /// Reverses an applied source leg.
    fn compensate(
        &self,
        record: &mut StockRecord,
        delta: i64,
        actor: &ActorId,
    ) -> Result<(), LedgerError> {
        match self.ledger.apply(
            record,
            delta,
            TransactionKind::AdjustAdd,
            TRANSFER_ROLLBACK_NOTE,
            actor,
        ) {
            Ok(rollback) => {
                tracing::warn!(
                    product = %record.product,
                    location = %record.location,
                    rollback = %rollback.id,
                    "transfer destination leg failed; source leg reversed"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    product = %record.product,
                    location = %record.location,
                    delta,
                    error = %err,
                    "transfer rollback failed; manual reconciliation required"
                );
                Err(err.requiring_reconciliation())
            }
        }
    }
}

/// Locks two distinct records in canonical key order.
///
/// Returns the guards in argument order regardless of acquisition order, so
/// concurrent transfers in opposite directions cannot deadlock.
fn lock_in_order<'a>(
    first: (&StockKey, &'a RecordEntry),
    second: (&StockKey, &'a RecordEntry),
) -> (MutexGuard<'a, StockRecord>, MutexGuard<'a, StockRecord>) {
    debug_assert_ne!(first.0, second.0);
    if first.0 < second.0 {
        let a = first.1.lock();
        let b = second.1.lock();
        (a, b)
    } else {
        let b = second.1.lock();
        let a = first.1.lock();
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stocked(quantity: i64) -> Arc<StockLedger> {
        let ledger = Arc::new(StockLedger::new());
        ledger
            .adjust(
                &"P1".into(),
                &"KITCHEN".into(),
                quantity,
                TransactionKind::AdjustAdd,
                "opening count",
                &"ops".into(),
            )
            .unwrap();
        ledger
    }

    #[test]
    fn transfer_pairs_legs() {
        let ledger = stocked(45);
        let coordinator = TransferCoordinator::new(Arc::clone(&ledger));

        let op = coordinator
            .transfer(
                &"P1".into(),
                &"KITCHEN".into(),
                &"WAREHOUSE".into(),
                20,
                &"ops".into(),
                "restock",
            )
            .unwrap();

        assert_eq!(op.net_delta(), 0);
        assert_eq!(op.outbound.kind, TransactionKind::TransferOut);
        assert_eq!(op.inbound.kind, TransactionKind::TransferIn);
        assert_eq!(op.outbound.new_quantity, 25);
        assert_eq!(op.inbound.new_quantity, 20);
        assert!(op.outbound.id < op.inbound.id);
    }

    #[test]
    fn rejects_zero_and_same_location() {
        let ledger = stocked(5);
        let coordinator = TransferCoordinator::new(ledger);
        let (p, k, w, a) = (
            "P1".into(),
            "KITCHEN".into(),
            "WAREHOUSE".into(),
            "ops".into(),
        );
        assert_eq!(
            coordinator.transfer(&p, &k, &w, 0, &a, "").unwrap_err(),
            LedgerError::InvalidQuantity
        );
        assert_eq!(
            coordinator.transfer(&p, &k, &k, 1, &a, "").unwrap_err(),
            LedgerError::SameLocation
        );
    }

    #[test]
    fn lock_order_is_independent_of_argument_order() {
        let ledger = stocked(1);
        let a_key = StockKey::new("P1", "A");
        let b_key = StockKey::new("P1", "B");
        let a = ledger.entry(&a_key);
        let b = ledger.entry(&b_key);

        let (first, second) = lock_in_order((&b_key, &b), (&a_key, &a));
        assert_eq!(first.location, LocationId::from("B"));
        assert_eq!(second.location, LocationId::from("A"));
    }
}
