//! Transaction registry.
//!
//! The manager only tracks which transaction ids are live; per-transaction
//! undo state lives in the recovery manager's record stacks, and there is
//! no lock table because concurrency control stops at page and index
//! latches.

use eyre::{ensure, Result};
use hashbrown::HashSet;
use parking_lot::Mutex;

/// Identifier a client attaches to a transaction.
pub type TxnId = u64;

/// Registry of running transactions.
#[derive(Default)]
pub struct TransactionManager {
    active: Mutex<HashSet<TxnId>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transaction. Rejects an id that is already running.
    pub fn begin(&self, txn: TxnId) -> Result<()> {
        ensure!(
            self.active.lock().insert(txn),
            "transaction {txn} is already running"
        );
        Ok(())
    }

    /// Finishes a transaction. Rejects an id that is not running.
    pub fn commit(&self, txn: TxnId) -> Result<()> {
        ensure!(
            self.active.lock().remove(&txn),
            "transaction {txn} is not running"
        );
        Ok(())
    }

    pub fn is_active(&self, txn: TxnId) -> bool {
        self.active.lock().contains(&txn)
    }

    /// Snapshot of the running transaction ids.
    pub fn active(&self) -> Vec<TxnId> {
        self.active.lock().iter().copied().collect()
    }
}
