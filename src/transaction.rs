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

//! Immutable stock transactions.
//!
//! Every successful [`StockLedger::adjust`](crate::StockLedger::adjust)
//! produces exactly one [`Transaction`]. Entries are never edited once
//! appended; corrections are new entries.

use crate::base::{ActorId, LocationId, ProductId, StockKey, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of stock mutation a transaction records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    AdjustAdd,
    AdjustRemove,
    TransferOut,
    TransferIn,
    ProductionIntake,
}

impl TransactionKind {
    /// Whether this kind of mutation increases stock.
    pub fn is_credit(self) -> bool {
        matches!(
            self,
            Self::AdjustAdd | Self::TransferIn | Self::ProductionIntake
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AdjustAdd => "adjust-add",
            Self::AdjustRemove => "adjust-remove",
            Self::TransferOut => "transfer-out",
            Self::TransferIn => "transfer-in",
            Self::ProductionIntake => "production-intake",
        };
        f.write_str(name)
    }
}

/// One applied stock mutation.
///
/// # Invariants
///
/// - `new_quantity == previous_quantity + delta`.
/// - `new_quantity` equals the record's quantity at the moment of append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub product: ProductId,
    pub location: LocationId,
    pub kind: TransactionKind,
    pub delta: i64,
    pub previous_quantity: u64,
    pub new_quantity: u64,
    pub timestamp: DateTime<Utc>,
    pub note: String,
    pub actor: ActorId,
}

impl Transaction {
    pub fn key(&self) -> StockKey {
        StockKey {
            location: self.location.clone(),
            product: self.product.clone(),
        }
    }

    /// Checks `new_quantity == previous_quantity + delta` without overflow.
    pub fn is_consistent(&self) -> bool {
        i128::from(self.previous_quantity) + i128::from(self.delta)
            == i128::from(self.new_quantity)
    }
}

/// A journaled change to a record's low-stock threshold.
///
/// Thresholds are record state but not stock, so they are kept out of the
/// transaction sequence and carry no [`TransactionId`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThresholdChange {
    pub product: ProductId,
    pub location: LocationId,
    pub low_stock_threshold: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: ActorId,
}

impl ThresholdChange {
    pub fn key(&self) -> StockKey {
        StockKey {
            location: self.location.clone(),
            product: self.product.clone(),
        }
    }
}
