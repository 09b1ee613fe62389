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

//! Order fulfillment.
//!
//! Resolution is a read-only snapshot: it reports the true current stock for
//! each requested line and the shortage credit owed for what cannot be
//! supplied. Dispatch is a separate, explicit decrement through the ledger.
//! Because resolution takes no locks, a dispatch may still hit
//! [`LedgerError::InsufficientStock`]; that result is authoritative and the
//! caller should resolve again.

use crate::base::{ActorId, LocationId, ProductId};
use crate::error::LedgerError;
use crate::ledger::StockLedger;
use crate::transaction::{Transaction, TransactionKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Note attached to compensating entries of a failed dispatch.
pub const DISPATCH_ROLLBACK_NOTE: &str = "dispatch rollback";

/// One requested order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product: ProductId,
    pub location: LocationId,
    pub requested_quantity: u64,
    pub unit_price: Decimal,
}

/// Resolution of one order line against current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLineResolution {
    pub product: ProductId,
    pub location: LocationId,
    pub requested_quantity: u64,
    /// Full current stock at resolution time, not clamped to the request.
    pub available_quantity: u64,
    /// `max(0, requested - available)`
    pub shortfall: u64,
    /// `shortfall * unit_price`
    pub shortage_credit: Decimal,
}

impl OrderLineResolution {
    /// Units a dispatch of this line removes: `min(requested, available)`.
    pub fn delivered_quantity(&self) -> u64 {
        self.requested_quantity.min(self.available_quantity)
    }
}

/// Resolution of a whole order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderResolution {
    pub lines: Vec<OrderLineResolution>,
    pub total_shortage_credit: Decimal,
}

impl OrderResolution {
    pub fn is_fully_available(&self) -> bool {
        self.lines.iter().all(|line| line.shortfall == 0)
    }
}

/// Computes what an order can be supplied and dispatches it.
#[derive(Debug, Clone)]
pub struct FulfillmentEngine {
    ledger: Arc<StockLedger>,
}

impl FulfillmentEngine {
    pub fn new(ledger: Arc<StockLedger>) -> Self {
        Self { ledger }
    }

    /// Resolves order lines against current stock without mutating it.
    ///
    /// Calling this twice with no adjustment in between yields identical
    /// results.
    pub fn resolve(&self, lines: &[OrderLine]) -> OrderResolution {
        let lines: Vec<OrderLineResolution> = lines
            .iter()
            .map(|line| {
                let available = self.ledger.get_quantity(&line.product, &line.location);
                let shortfall = line.requested_quantity.saturating_sub(available);
                OrderLineResolution {
                    product: line.product.clone(),
                    location: line.location.clone(),
                    requested_quantity: line.requested_quantity,
                    available_quantity: available,
                    shortfall,
                    shortage_credit: Decimal::from(shortfall) * line.unit_price,
                }
            })
            .collect();
        let total_shortage_credit = lines.iter().map(|line| line.shortage_credit).sum();

        OrderResolution {
            lines,
            total_shortage_credit,
        }
    }

    /// Removes each line's delivered quantity from the ledger.
    ///
    /// Lines with nothing to deliver are skipped. Returns the applied
    /// `adjust-remove` transactions in line order.
    ///
    /// # Errors
    ///
    /// Returns the first line's error, after reversing the lines this call
    /// already dispatched. If a reversal fails the error is a
    /// [`LedgerError::StorageFailure`] requiring manual reconciliation.
    pub fn dispatch(
        &self,
        resolution: &OrderResolution,
        actor: &ActorId,
        note: &str,
    ) -> Result<Vec<Arc<Transaction>>, LedgerError> {
        let mut dispatched = Vec::with_capacity(resolution.lines.len());

        for line in &resolution.lines {
            let delivered = line.delivered_quantity();
            if delivered == 0 {
                continue;
            }
            let result = i64::try_from(delivered)
                .map_err(|_| LedgerError::QuantityOverflow)
                .and_then(|delta| {
                    self.ledger.adjust(
                        &line.product,
                        &line.location,
                        -delta,
                        TransactionKind::AdjustRemove,
                        note,
                        actor,
                    )
                });
            match result {
                Ok(transaction) => dispatched.push(transaction),
                Err(err) => {
                    tracing::warn!(
                        product = %line.product,
                        location = %line.location,
                        delivered,
                        error = %err,
                        "dispatch failed; reversing dispatched lines"
                    );
                    self.roll_back(&dispatched, actor)?;
                    return Err(err);
                }
            }
        }

        tracing::info!(lines = dispatched.len(), %actor, "order dispatched");
        Ok(dispatched)
    }

    fn roll_back(&self, dispatched: &[Arc<Transaction>], actor: &ActorId) -> Result<(), LedgerError> {
        for transaction in dispatched.iter().rev() {
            self.ledger
                .adjust(
                    &transaction.product,
                    &transaction.location,
                    -transaction.delta,
                    TransactionKind::AdjustAdd,
                    DISPATCH_ROLLBACK_NOTE,
                    actor,
                )
                .map_err(|err| {
                    tracing::error!(
                        product = %transaction.product,
                        location = %transaction.location,
                        dispatched = %transaction.id,
                        error = %err,
                        "dispatch rollback failed; manual reconciliation required"
                    );
                    err.requiring_reconciliation()
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product: &str, requested: u64, price: Decimal) -> OrderLine {
        OrderLine {
            product: product.into(),
            location: "KITCHEN".into(),
            requested_quantity: requested,
            unit_price: price,
        }
    }

    #[test]
    fn unknown_product_is_entirely_short() {
        let engine = FulfillmentEngine::new(Arc::new(StockLedger::new()));
        let resolution = engine.resolve(&[line("GHOST", 3, dec!(2.50))]);
        let resolved = &resolution.lines[0];
        assert_eq!(resolved.available_quantity, 0);
        assert_eq!(resolved.shortfall, 3);
        assert_eq!(resolved.shortage_credit, dec!(7.50));
        assert_eq!(resolved.delivered_quantity(), 0);
        assert!(!resolution.is_fully_available());
    }

    #[test]
    fn empty_order_resolves_to_nothing() {
        let engine = FulfillmentEngine::new(Arc::new(StockLedger::new()));
        let resolution = engine.resolve(&[]);
        assert!(resolution.lines.is_empty());
        assert_eq!(resolution.total_shortage_credit, Decimal::ZERO);
        assert!(resolution.is_fully_available());
    }

    #[test]
    fn delivered_is_min_of_requested_and_available() {
        let resolved = OrderLineResolution {
            product: "P1".into(),
            location: "KITCHEN".into(),
            requested_quantity: 10,
            available_quantity: 40,
            shortfall: 0,
            shortage_credit: Decimal::ZERO,
        };
        assert_eq!(resolved.delivered_quantity(), 10);
    }

    #[test]
    fn dispatch_of_nothing_touches_nothing() {
        let ledger = Arc::new(StockLedger::new());
        let engine = FulfillmentEngine::new(Arc::clone(&ledger));
        let resolution = engine.resolve(&[line("GHOST", 3, dec!(1))]);
        let applied = engine.dispatch(&resolution, &"ops".into(), "order 1").unwrap();
        assert!(applied.is_empty());
        assert!(ledger.log().is_empty());
    }
}
