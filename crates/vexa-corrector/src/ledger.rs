// Copyright 2026 Vexa Dev
// SPDX-License-Identifier: Apache-2.0

//! Durable checked-object ledger backed by redb.

use std::path::Path;
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableTableMetadata, TableDefinition};
use tracing::debug;
use vexa_core::{Error, Result};

/// Checked table: object ID -> empty marker.
const CHECKED: TableDefinition<'_, &str, ()> = TableDefinition::new("checked");

/// Convert any error with Display to our Error type.
fn ledger_err(e: impl std::fmt::Display) -> Error {
    Error::Ledger(e.to_string())
}

/// Durable set of object IDs already reconciled in the current pass.
///
/// Object streams can emit duplicates across retries and the same ID is
/// listed once per agent holding it, so reconciliation must be at-most-once
/// per ID. The set is a redb database on local disk: a corrector restarted
/// mid-pass picks up where it left off instead of re-repairing everything.
///
/// All operations run on the blocking pool; redb handles its own internal
/// locking, so callers need no coordination beyond [`close`](Self::close).
pub struct CheckedLedger {
    db: Mutex<Option<Arc<Database>>>,
}

impl CheckedLedger {
    /// Opens or creates the ledger at the given path, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        debug!(?path, "Opening checked ledger");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ledger_err)?;
        }
        let db = Database::create(path).map_err(ledger_err)?;

        // Initialize the table so reads before the first mark succeed
        {
            let txn = db.begin_write().map_err(ledger_err)?;
            let _ = txn.open_table(CHECKED).map_err(ledger_err)?;
            txn.commit().map_err(ledger_err)?;
        }

        Ok(Self { db: Mutex::new(Some(Arc::new(db))) })
    }

    fn db(&self) -> Result<Arc<Database>> {
        self.db
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| Error::Ledger("ledger closed".to_string()))
    }

    /// Returns whether the ID has already been recorded.
    pub async fn contains(&self, id: &str) -> Result<bool> {
        let db = self.db()?;
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(ledger_err)?;
            let table = txn.open_table(CHECKED).map_err(ledger_err)?;
            Ok(table.get(id.as_str()).map_err(ledger_err)?.is_some())
        })
        .await
        .map_err(ledger_err)?
    }

    /// Records an ID as reconciled. Marking the same ID twice is a no-op.
    pub async fn mark(&self, id: &str) -> Result<()> {
        let db = self.db()?;
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(ledger_err)?;
            {
                let mut table = txn.open_table(CHECKED).map_err(ledger_err)?;
                table.insert(id.as_str(), ()).map_err(ledger_err)?;
            }
            txn.commit().map_err(ledger_err)?;
            Ok(())
        })
        .await
        .map_err(ledger_err)?
    }

    /// Returns the number of recorded IDs.
    pub async fn len(&self) -> Result<u64> {
        let db = self.db()?;
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(ledger_err)?;
            let table = txn.open_table(CHECKED).map_err(ledger_err)?;
            table.len().map_err(ledger_err)
        })
        .await
        .map_err(ledger_err)?
    }

    /// Closes the ledger; every subsequent operation fails.
    ///
    /// Commits are durable on their own, so close only has to drop the
    /// database handle. Closing an already-closed ledger is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.db.lock().expect("lock poisoned").take().is_some() {
            debug!("Checked ledger closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_and_contains() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CheckedLedger::open(&dir.path().join("checked.redb")).unwrap();

        assert!(!ledger.contains("o1").await.unwrap());
        ledger.mark("o1").await.unwrap();
        assert!(ledger.contains("o1").await.unwrap());
        assert!(!ledger.contains("o2").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CheckedLedger::open(&dir.path().join("checked.redb")).unwrap();

        ledger.mark("o1").await.unwrap();
        ledger.mark("o1").await.unwrap();
        assert_eq!(ledger.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checked.redb");

        {
            let ledger = CheckedLedger::open(&path).unwrap();
            ledger.mark("o1").await.unwrap();
            ledger.close().unwrap();
        }

        let reopened = CheckedLedger::open(&path).unwrap();
        assert!(reopened.contains("o1").await.unwrap());
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/checked.redb");
        let ledger = CheckedLedger::open(&path).unwrap();
        ledger.mark("o1").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CheckedLedger::open(&dir.path().join("checked.redb")).unwrap();

        ledger.close().unwrap();
        ledger.close().unwrap();
        assert!(ledger.contains("o1").await.is_err());
        assert!(ledger.mark("o1").await.is_err());
    }
}
