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

//! CSV-file journal.
//!
//! One row per transaction, appended and flushed before the ledger applies
//! the mutation. On restart the rows are read back in order and replayed
//! through [`StockLedger::replay`](crate::StockLedger::replay).
//!
//! Threshold changes have their own schema, so they go to a second file
//! next to the journal (`journal.csv` keeps them in
//! `journal.thresholds.csv`), replayed through
//! [`StockLedger::replay_thresholds`](crate::StockLedger::replay_thresholds).

use crate::error::StorageError;
use crate::transaction::{ThresholdChange, Transaction};
use crate::transaction_log::Journal;
use csv::{ReaderBuilder, WriterBuilder};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Append-only CSV journal backed by a file.
#[derive(Debug)]
pub struct CsvJournal {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
    thresholds: Mutex<csv::Writer<File>>,
}

impl CsvJournal {
    /// Opens `path` and its thresholds file for appending, creating them
    /// if needed.
    ///
    /// A header row is written only when a file is new or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let writer = open_writer(&path)?;
        let thresholds = open_writer(&Self::thresholds_path(&path))?;
        Ok(Self {
            path,
            writer: Mutex::new(writer),
            thresholds: Mutex::new(thresholds),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the threshold changes of the journal at `path` are kept.
    pub fn thresholds_path(path: impl AsRef<Path>) -> PathBuf {
        path.as_ref().with_extension("thresholds.csv")
    }

    /// Reads every journaled transaction in file order.
    ///
    /// A missing file is an empty journal.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Transaction>, StorageError> {
        read_rows(path.as_ref())
    }

    /// Reads every threshold change of the journal at `path`, in file order.
    pub fn read_thresholds(path: impl AsRef<Path>) -> Result<Vec<ThresholdChange>, StorageError> {
        read_rows(&Self::thresholds_path(path))
    }
}

impl Journal for CsvJournal {
    fn append(&self, transaction: &Transaction) -> Result<(), StorageError> {
        write_row(&self.writer, transaction)
    }

    fn record_threshold(&self, change: &ThresholdChange) -> Result<(), StorageError> {
        write_row(&self.thresholds, change)
    }
}

fn open_writer(path: &Path) -> Result<csv::Writer<File>, StorageError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_empty = file.metadata()?.len() == 0;
    Ok(WriterBuilder::new()
        .has_headers(is_empty)
        .from_writer(file))
}

fn write_row(writer: &Mutex<csv::Writer<File>>, row: &impl Serialize) -> Result<(), StorageError> {
    let mut writer = writer.lock();
    writer.serialize(row)?;
    writer.flush()?;
    Ok(())
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let mut rows = Vec::new();
    for row in reader.deserialize::<T>() {
        rows.push(row?);
    }
    Ok(rows)
}
