//! Lock records and queued lock requests.

use std::collections::BTreeSet;

use repdb_types::{LockMode, TxnId};
use serde::{Deserialize, Serialize};

/// A lock on one variable at one site.
///
/// An exclusive lock has exactly one holder; a shared lock has at least one.
/// Locks with no holders are removed from the table rather than kept empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    mode: LockMode,
    holders: BTreeSet<TxnId>,
}

impl Lock {
    /// Creates a shared lock held by `txn`.
    pub fn shared(txn: TxnId) -> Self {
        Self {
            mode: LockMode::Shared,
            holders: BTreeSet::from([txn]),
        }
    }

    /// Creates an exclusive lock held by `txn`.
    pub fn exclusive(txn: TxnId) -> Self {
        Self {
            mode: LockMode::Exclusive,
            holders: BTreeSet::from([txn]),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn holders(&self) -> &BTreeSet<TxnId> {
        &self.holders
    }

    pub fn is_held_by(&self, txn: TxnId) -> bool {
        self.holders.contains(&txn)
    }

    /// Returns true if `txn` is the only holder.
    pub fn is_sole_holder(&self, txn: TxnId) -> bool {
        self.holders.len() == 1 && self.holders.contains(&txn)
    }

    /// Adds a holder to a shared lock.
    pub(crate) fn join(&mut self, txn: TxnId) {
        debug_assert_eq!(self.mode, LockMode::Shared, "only shared locks can be joined");
        self.holders.insert(txn);
    }

    /// Upgrades a shared lock held solely by its owner to exclusive.
    pub(crate) fn promote(&mut self) {
        debug_assert_eq!(self.holders.len(), 1, "promotion requires a sole holder");
        self.mode = LockMode::Exclusive;
    }

    /// Removes `txn` from the holder set. Returns true if no holders remain.
    pub(crate) fn release(&mut self, txn: TxnId) -> bool {
        self.holders.remove(&txn);
        self.holders.is_empty()
    }
}

/// A lock request waiting in a variable's FIFO queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub txn: TxnId,
    pub mode: LockMode,
}

impl LockRequest {
    pub fn new(txn: TxnId, mode: LockMode) -> Self {
        Self { txn, mode }
    }
}
