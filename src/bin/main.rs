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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use inventory_ledger_rs::{
    ActorId, CsvJournal, LedgerConfig, LedgerError, LocationId, ProductId, StockLedger,
    StockStatus, TransactionKind, TransferCoordinator,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Inventory Ledger - Apply stock operations from a CSV file
///
/// Reads stock operations from a CSV file and writes the resulting stock
/// records to stdout. Supports manual additions and removals, transfers
/// between locations, and low-stock threshold changes.
#[derive(Parser, Debug)]
#[command(name = "inventory-ledger-rs")]
#[command(about = "A multi-location stock ledger that applies operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,product,location,destination,quantity,actor,note
    /// Example: cargo run -- ops.csv > stock.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// CSV journal to replay at start and append every transaction to
    #[arg(long, value_name = "FILE")]
    journal: Option<PathBuf>,

    /// Low-stock threshold for records created by this run
    #[arg(long, value_name = "N", default_value_t = LedgerConfig::default().default_low_stock_threshold)]
    low_stock_threshold: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = LedgerConfig {
        default_low_stock_threshold: args.low_stock_threshold,
    };

    let ledger = match open_ledger(config, args.journal.as_ref()) {
        Ok(ledger) => Arc::new(ledger),
        Err(e) => {
            tracing::error!("Error opening journal: {}", e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = process_operations(&ledger, BufReader::new(file)) {
        tracing::error!("Error processing operations: {}", e);
        process::exit(1);
    }

    if let Err(e) = write_stock(&ledger, std::io::stdout()) {
        tracing::error!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Builds the ledger, replaying the journal first when one is given.
fn open_ledger(
    config: LedgerConfig,
    journal: Option<&PathBuf>,
) -> Result<StockLedger, Box<dyn std::error::Error>> {
    let Some(path) = journal else {
        return Ok(StockLedger::with_config(config));
    };
    let history = CsvJournal::read_all(path)?;
    let thresholds = CsvJournal::read_thresholds(path)?;
    let ledger = StockLedger::with_journal(config, CsvJournal::open(path)?);
    ledger.replay(history)?;
    ledger.replay_thresholds(thresholds);
    Ok(ledger)
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, product, location, destination, quantity, actor, note`
#[derive(Debug, Deserialize)]
struct CsvOperation {
    op: String,
    product: String,
    location: String,
    #[serde(default)]
    destination: Option<String>,
    quantity: u64,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

enum Operation {
    Add,
    Remove,
    Transfer(LocationId),
    Threshold,
}

impl CsvOperation {
    /// Returns `None` for unknown ops or a transfer without destination.
    fn operation(&self) -> Option<Operation> {
        match self.op.to_lowercase().as_str() {
            "add" => Some(Operation::Add),
            "remove" => Some(Operation::Remove),
            "transfer" => self
                .destination
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|d| Operation::Transfer(LocationId::from(d))),
            "threshold" => Some(Operation::Threshold),
            _ => None,
        }
    }
}

/// Apply operations from a CSV reader.
///
/// Rows are streamed. Malformed rows and rejected operations are logged and
/// skipped; they do not stop processing.
///
/// # CSV Format
///
/// - `op`: add, remove, transfer, threshold
/// - `product`, `location`: identifiers
/// - `destination`: target location (transfer only)
/// - `quantity`: units (or the new threshold)
/// - `actor`, `note`: optional audit fields
///
/// ```csv
/// op,product,location,destination,quantity,actor,note
/// add,P1,KITCHEN,,45,ops,opening count
/// transfer,P1,KITCHEN,WAREHOUSE,20,ops,
/// remove,P1,WAREHOUSE,,5,ops,spoiled
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn process_operations<R: Read>(ledger: &Arc<StockLedger>, reader: R) -> Result<(), csv::Error> {
    let transfers = TransferCoordinator::new(Arc::clone(ledger));

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvOperation>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping malformed row: {}", e);
                continue;
            }
        };
        let Some(operation) = record.operation() else {
            tracing::warn!("Skipping invalid operation '{}'", record.op);
            continue;
        };
        if let Err(e) = apply(ledger, &transfers, &record, operation) {
            tracing::warn!(product = %record.product, location = %record.location, "Skipping {}: {}", record.op, e);
        }
    }

    Ok(())
}

fn apply(
    ledger: &StockLedger,
    transfers: &TransferCoordinator,
    record: &CsvOperation,
    operation: Operation,
) -> Result<(), LedgerError> {
    let product = ProductId::from(record.product.as_str());
    let location = LocationId::from(record.location.as_str());
    let actor = ActorId::from(record.actor.as_deref().unwrap_or("cli"));
    let note = record.note.as_deref().unwrap_or_default();
    let delta = || i64::try_from(record.quantity).map_err(|_| LedgerError::QuantityOverflow);

    match operation {
        Operation::Add => {
            ledger.adjust(&product, &location, delta()?, TransactionKind::AdjustAdd, note, &actor)?;
        }
        Operation::Remove => {
            ledger.adjust(&product, &location, -delta()?, TransactionKind::AdjustRemove, note, &actor)?;
        }
        Operation::Transfer(destination) => {
            transfers.transfer(&product, &location, &destination, record.quantity, &actor, note)?;
        }
        Operation::Threshold => {
            ledger.set_low_stock_threshold(&product, &location, record.quantity, &actor)?;
        }
    }
    Ok(())
}

/// Output row for one stock record.
#[derive(Debug, Serialize)]
struct StockRow<'a> {
    product: &'a str,
    location: &'a str,
    quantity: u64,
    low_stock_threshold: u64,
    status: StockStatus,
}

/// Write stock records to a CSV writer.
///
/// # CSV Format
///
/// Columns: `product, location, quantity, low_stock_threshold, status`
///
/// ```csv
/// product,location,quantity,low_stock_threshold,status
/// P1,KITCHEN,25,10,in-stock
/// P1,WAREHOUSE,15,10,in-stock
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_stock<W: Write>(ledger: &StockLedger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for record in ledger.records() {
        wtr.serialize(StockRow {
            product: record.product.as_str(),
            location: record.location.as_str(),
            quantity: record.quantity,
            low_stock_threshold: record.low_stock_threshold,
            status: record.status(),
        })?;
    }

    wtr.flush()?;
    Ok(())
}
