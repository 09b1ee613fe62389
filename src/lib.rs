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

//! # Inventory Ledger
//!
//! This library tracks per-location stock for each product, records every
//! mutation as an immutable transaction, moves stock between locations
//! without losing or duplicating units, computes shortage credit for orders
//! that cannot be fully supplied, and admits production output into stock
//! only when it passes its quality check.
//!
//! ## Core Components
//!
//! - [`StockLedger`]: Current quantity per (product, location) and the only mutation path
//! - [`TransactionLog`]: Append-only history of every mutation
//! - [`TransferCoordinator`]: All-or-nothing moves between locations
//! - [`FulfillmentEngine`]: Read-only order resolution plus explicit dispatch
//! - [`ProductionGate`]: Batch lifecycle with quality-gated intake
//! - [`LedgerError`]: Error types for all of the above
//!
//! ## Example
//!
//! ```
//! use inventory_ledger_rs::{
//!     ActorId, FulfillmentEngine, LocationId, OrderLine, ProductId, StockLedger,
//!     TransactionKind, TransferCoordinator,
//! };
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(StockLedger::new());
//! let (bread, kitchen, hub) = (
//!     ProductId::from("BREAD"),
//!     LocationId::from("KITCHEN"),
//!     LocationId::from("HUB"),
//! );
//! let actor = ActorId::from("ops");
//!
//! ledger
//!     .adjust(&bread, &kitchen, 45, TransactionKind::AdjustAdd, "bake", &actor)
//!     .unwrap();
//!
//! let transfers = TransferCoordinator::new(Arc::clone(&ledger));
//! transfers.transfer(&bread, &kitchen, &hub, 20, &actor, "morning run").unwrap();
//! assert_eq!(ledger.get_quantity(&bread, &kitchen), 25);
//! assert_eq!(ledger.get_quantity(&bread, &hub), 20);
//!
//! let fulfillment = FulfillmentEngine::new(Arc::clone(&ledger));
//! let resolution = fulfillment.resolve(&[OrderLine {
//!     product: bread.clone(),
//!     location: hub.clone(),
//!     requested_quantity: 25,
//!     unit_price: dec!(3.50),
//! }]);
//! assert_eq!(resolution.total_shortage_credit, dec!(17.50));
//! ```
//!
//! ## Thread Safety
//!
//! Every stock record has its own lock. Mutations of the same record are
//! serialized, mutations of different records run in parallel, and
//! transfers lock their two records in a canonical order.

mod base;
pub mod error;
pub mod fulfillment;
pub mod journal;
pub mod ledger;
pub mod production;
mod transaction;
pub mod transaction_log;
pub mod transfer;

pub use base::{ActorId, BatchId, LocationId, ProductId, StockKey, TransactionId};
pub use error::{LedgerError, NotFound, StorageError};
pub use fulfillment::{FulfillmentEngine, OrderLine, OrderLineResolution, OrderResolution};
pub use journal::CsvJournal;
pub use ledger::{LedgerConfig, StockLedger, StockRecord, StockStatus};
pub use production::{
    BatchAction, BatchStatus, CompletionReport, ProductionBatch, ProductionGate, QualityCheck,
};
pub use transaction::{ThresholdChange, Transaction, TransactionKind};
pub use transaction_log::{History, Journal, TransactionLog};
pub use transfer::{TransferCoordinator, TransferOperation};
