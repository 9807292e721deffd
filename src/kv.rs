// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! The embedded side table mapping coin symbols to their creating
//! transaction hash, consumed by the metadata repair loop.

use std::path::Path;

use crate::common::IndexerError;

/// Keys are coin symbols, values are bare transaction hashes (no prefix).
pub struct SymbolTable {
    db: sled::Db,
}

impl SymbolTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// An ephemeral table for tests.
    #[cfg(test)]
    pub(crate) fn temporary() -> Self {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("temporary side table");
        Self { db }
    }

    /// Records the creating transaction of a symbol. Overwrites are fine:
    /// symbols are unique on chain, a replayed block writes the same hash.
    pub fn record(&self, symbol: &str, tx_hash: &str) -> Result<(), IndexerError> {
        self.db.insert(symbol.as_bytes(), tx_hash.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Result<Option<String>, IndexerError> {
        Ok(self
            .db
            .get(symbol.as_bytes())?
            .map(|value| String::from_utf8_lossy(&value).into_owned()))
    }

    pub fn remove(&self, symbol: &str) -> Result<(), IndexerError> {
        self.db.remove(symbol.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_removes_symbols() {
        let table = SymbolTable::temporary();
        table.record("ACME", "feed01").unwrap();
        assert_eq!(table.get("ACME").unwrap().as_deref(), Some("feed01"));
        table.remove("ACME").unwrap();
        assert_eq!(table.get("ACME").unwrap(), None);
    }
}
