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

//! Production batches and quality-gated stock intake.
//!
//! Batch lifecycle:
//!
//! ```text
//! Planned ──start──► InProgress ──complete──► Completed
//!    │
//!    └──cancel──► Cancelled
//! ```
//!
//! Completed and Cancelled are terminal. Only a completion whose quality
//! check passed adds stock, and it adds exactly the actual quantity
//! produced. Wastage is recorded on the batch and never touches the ledger.

use crate::base::{ActorId, BatchId, LocationId, ProductId, TransactionId};
use crate::error::{LedgerError, NotFound};
use crate::ledger::StockLedger;
use crate::transaction::TransactionKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Planned => "planned",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum QualityCheck {
    Pending,
    Passed,
    Failed,
}

/// A requested batch state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Start,
    Complete,
    Cancel,
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        })
    }
}

/// A planned unit of manufacture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionBatch {
    pub id: BatchId,
    pub product: ProductId,
    pub location: LocationId,
    pub target_quantity: u64,
    /// Set on completion.
    pub actual_quantity: Option<u64>,
    /// Set on completion.
    pub wastage: Option<u64>,
    pub status: BatchStatus,
    pub quality_check: QualityCheck,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// The `production-intake` transaction, if stock was admitted.
    pub intake: Option<TransactionId>,
}

impl ProductionBatch {
    /// Actual output as a percentage of target, once completed.
    pub fn yield_percent(&self) -> Option<Decimal> {
        let actual = self.actual_quantity?;
        if self.target_quantity == 0 {
            return None;
        }
        Some(Decimal::from(actual) * Decimal::ONE_HUNDRED / Decimal::from(self.target_quantity))
    }

    fn invalid(&self, action: BatchAction) -> LedgerError {
        LedgerError::InvalidTransition {
            batch: self.id.clone(),
            status: self.status,
            action,
        }
    }
}

/// What was produced, reported when a batch completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub actual_quantity: u64,
    pub wastage: u64,
    pub quality_check: QualityCheck,
    #[serde(default)]
    pub notes: String,
}

/// Tracks production batches and admits passed output into the ledger.
#[derive(Debug)]
pub struct ProductionGate {
    ledger: Arc<StockLedger>,
    batches: DashMap<BatchId, Arc<Mutex<ProductionBatch>>>,
}

impl ProductionGate {
    pub fn new(ledger: Arc<StockLedger>) -> Self {
        Self {
            ledger,
            batches: DashMap::new(),
        }
    }

    /// Creates a planned batch.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidQuantity`] if `target_quantity` is zero.
    pub fn plan(
        &self,
        product: &ProductId,
        location: &LocationId,
        target_quantity: u64,
    ) -> Result<ProductionBatch, LedgerError> {
        if target_quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        let batch = ProductionBatch {
            id: BatchId::generate(),
            product: product.clone(),
            location: location.clone(),
            target_quantity,
            actual_quantity: None,
            wastage: None,
            status: BatchStatus::Planned,
            quality_check: QualityCheck::Pending,
            notes: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            intake: None,
        };
        self.batches
            .insert(batch.id.clone(), Arc::new(Mutex::new(batch.clone())));
        tracing::info!(batch = %batch.id, %product, %location, target_quantity, "batch planned");
        Ok(batch)
    }

    /// Moves a planned batch to in-progress and records its start time.
    pub fn start(&self, id: &BatchId) -> Result<ProductionBatch, LedgerError> {
        let entry = self.get(id)?;
        let mut batch = entry.lock();
        match batch.status {
            BatchStatus::Planned => {
                batch.status = BatchStatus::InProgress;
                batch.started_at = Some(Utc::now());
                tracing::info!(batch = %id, "batch started");
                Ok(batch.clone())
            }
            BatchStatus::InProgress | BatchStatus::Completed | BatchStatus::Cancelled => {
                Err(batch.invalid(BatchAction::Start))
            }
        }
    }

    /// Completes an in-progress batch.
    ///
    /// A `Passed` quality check adds exactly `actual_quantity` to the
    /// batch's product and location (nothing when it is zero). A `Failed`
    /// check records the batch with no stock effect. If the intake cannot be
    /// logged, the batch stays in progress.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown batch.
    /// - [`LedgerError::InvalidTransition`] - batch is not in progress.
    /// - [`LedgerError::QualityCheckPending`] - the report has no verdict.
    /// - Any error from the intake adjustment.
    pub fn complete(
        &self,
        id: &BatchId,
        report: CompletionReport,
        actor: &ActorId,
    ) -> Result<ProductionBatch, LedgerError> {
        let entry = self.get(id)?;
        let mut batch = entry.lock();
        match batch.status {
            BatchStatus::InProgress => {}
            BatchStatus::Planned | BatchStatus::Completed | BatchStatus::Cancelled => {
                return Err(batch.invalid(BatchAction::Complete));
            }
        }

        let intake = match report.quality_check {
            QualityCheck::Pending => return Err(LedgerError::QualityCheckPending),
            QualityCheck::Failed => None,
            QualityCheck::Passed if report.actual_quantity == 0 => None,
            QualityCheck::Passed => {
                let delta = i64::try_from(report.actual_quantity)
                    .map_err(|_| LedgerError::QuantityOverflow)?;
                let note = format!("production batch {id}");
                let transaction = self.ledger.adjust(
                    &batch.product,
                    &batch.location,
                    delta,
                    TransactionKind::ProductionIntake,
                    &note,
                    actor,
                )?;
                Some(transaction.id)
            }
        };

        batch.status = BatchStatus::Completed;
        batch.quality_check = report.quality_check;
        batch.actual_quantity = Some(report.actual_quantity);
        batch.wastage = Some(report.wastage);
        batch.notes = report.notes;
        batch.completed_at = Some(Utc::now());
        batch.intake = intake;

        tracing::info!(
            batch = %id,
            quality = ?batch.quality_check,
            actual = report.actual_quantity,
            wastage = report.wastage,
            admitted = intake.is_some(),
            "batch completed"
        );
        Ok(batch.clone())
    }

    /// Cancels a planned batch. Started batches must be completed instead.
    pub fn cancel(&self, id: &BatchId) -> Result<ProductionBatch, LedgerError> {
        let entry = self.get(id)?;
        let mut batch = entry.lock();
        match batch.status {
            BatchStatus::Planned => {
                batch.status = BatchStatus::Cancelled;
                tracing::info!(batch = %id, "batch cancelled");
                Ok(batch.clone())
            }
            BatchStatus::InProgress | BatchStatus::Completed | BatchStatus::Cancelled => {
                Err(batch.invalid(BatchAction::Cancel))
            }
        }
    }

    /// Snapshot of one batch.
    pub fn batch(&self, id: &BatchId) -> Option<ProductionBatch> {
        self.batches.get(id).map(|entry| entry.value().lock().clone())
    }

    /// Snapshot of every batch, oldest first.
    pub fn batches(&self) -> Vec<ProductionBatch> {
        let entries: Vec<_> = self
            .batches
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut batches: Vec<ProductionBatch> =
            entries.iter().map(|entry| entry.lock().clone()).collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        batches
    }

    fn get(&self, id: &BatchId) -> Result<Arc<Mutex<ProductionBatch>>, LedgerError> {
        self.batches
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LedgerError::NotFound(NotFound::Batch(id.clone())))
    }
}
