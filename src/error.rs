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

//! Error types for ledger, transfer, fulfillment and production operations.

use crate::base::{BatchId, LocationId, ProductId, TransactionId};
use crate::production::{BatchAction, BatchStatus};
use crate::transaction::TransactionKind;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned to callers of the ledger engine.
///
/// Business-rule failures carry enough context for a UI to render an
/// actionable message. Storage failures only carry an incident reference;
/// the internal cause is logged under that reference and never returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A decrement would drive the quantity below zero
    #[error("insufficient stock of {product} at {location}: requested {requested}, available {available}")]
    InsufficientStock {
        product: ProductId,
        location: LocationId,
        requested: u64,
        available: u64,
    },

    /// Production batch state machine misuse
    #[error("cannot {action} batch {batch} while it is {status}")]
    InvalidTransition {
        batch: BatchId,
        status: BatchStatus,
        action: BatchAction,
    },

    /// Unknown batch
    #[error("{0} not found")]
    NotFound(NotFound),

    /// Underlying persistence failed
    #[error("{}", storage_message(.incident, .requires_reconciliation))]
    StorageFailure {
        incident: Uuid,
        requires_reconciliation: bool,
    },

    /// Quantity or delta is zero where a positive amount is required
    #[error("invalid quantity (must be non-zero)")]
    InvalidQuantity,

    /// Delta sign does not match the transaction kind
    #[error("{kind} cannot carry a delta of {delta}")]
    DeltaKindMismatch { kind: TransactionKind, delta: i64 },

    /// Transfer source and destination are the same location
    #[error("transfer source and destination must differ")]
    SameLocation,

    /// Completion requires a decided quality check
    #[error("quality check must be passed or failed to complete a batch")]
    QualityCheckPending,

    /// A credit would overflow the quantity type
    #[error("quantity overflow")]
    QuantityOverflow,

    /// Replayed journal entry disagrees with the reconstructed quantity
    #[error("journal entry {transaction} does not continue from the reconstructed quantity")]
    JournalMismatch { transaction: TransactionId },
}

/// What could not be found.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    #[error("batch {0}")]
    Batch(BatchId),
}

fn storage_message(incident: &Uuid, requires_reconciliation: &bool) -> String {
    if *requires_reconciliation {
        format!("storage failure (incident {incident}); stock requires manual reconciliation")
    } else {
        format!("storage failure (incident {incident})")
    }
}

impl LedgerError {
    /// Converts an internal storage error into a user-facing failure.
    ///
    /// The cause is logged at `error` level under a fresh incident id.
    pub(crate) fn storage(cause: &StorageError) -> Self {
        let incident = Uuid::new_v4();
        tracing::error!(%incident, error = %cause, "storage failure");
        LedgerError::StorageFailure {
            incident,
            requires_reconciliation: false,
        }
    }

    /// Marks a storage failure as needing manual reconciliation.
    pub(crate) fn requiring_reconciliation(self) -> Self {
        match self {
            LedgerError::StorageFailure { incident, .. } => LedgerError::StorageFailure {
                incident,
                requires_reconciliation: true,
            },
            other => other,
        }
    }

    /// Whether the caller must reconcile stock by hand before continuing.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(
            self,
            LedgerError::StorageFailure {
                requires_reconciliation: true,
                ..
            }
        )
    }
}

/// Persistence errors raised by journals.
///
/// Ledger operations never return these; they surface as
/// [`LedgerError::StorageFailure`] with an incident reference.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("journal i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("journal unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = LedgerError::InsufficientStock {
            product: ProductId::from("P1"),
            location: LocationId::from("KITCHEN"),
            requested: 50,
            available: 45,
        };
        assert_eq!(
            err.to_string(),
            "insufficient stock of P1 at KITCHEN: requested 50, available 45"
        );
        assert_eq!(
            LedgerError::InvalidTransition {
                batch: BatchId::from("B1"),
                status: BatchStatus::Completed,
                action: BatchAction::Start,
            }
            .to_string(),
            "cannot start batch B1 while it is completed"
        );
        assert_eq!(
            LedgerError::NotFound(NotFound::Batch(BatchId::from("B9"))).to_string(),
            "batch B9 not found"
        );
        assert_eq!(
            LedgerError::InvalidQuantity.to_string(),
            "invalid quantity (must be non-zero)"
        );
        assert_eq!(
            LedgerError::DeltaKindMismatch {
                kind: TransactionKind::AdjustRemove,
                delta: 4,
            }
            .to_string(),
            "adjust-remove cannot carry a delta of 4"
        );
        assert_eq!(
            LedgerError::SameLocation.to_string(),
            "transfer source and destination must differ"
        );
    }

    #[test]
    fn storage_failure_hides_cause() {
        let cause = StorageError::Unavailable("disk /var/lib/ledger full".into());
        let err = LedgerError::storage(&cause);
        let message = err.to_string();
        assert!(message.starts_with("storage failure (incident "));
        assert!(!message.contains("/var/lib"));
        assert!(!err.requires_reconciliation());
    }

    #[test]
    fn reconciliation_flag_is_kept_on_incident() {
        let err = LedgerError::storage(&StorageError::Unavailable("x".into()));
        let LedgerError::StorageFailure { incident, .. } = err.clone() else {
            panic!("expected storage failure");
        };
        let escalated = err.requiring_reconciliation();
        assert!(escalated.requires_reconciliation());
        assert!(escalated.to_string().contains(&incident.to_string()));
        assert!(escalated.to_string().contains("manual reconciliation"));
    }

    #[test]
    fn reconciliation_leaves_business_errors_alone() {
        assert_eq!(
            LedgerError::SameLocation.requiring_reconciliation(),
            LedgerError::SameLocation
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::QualityCheckPending;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
