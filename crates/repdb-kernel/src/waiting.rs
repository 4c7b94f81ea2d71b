//! Queued operations and the wait-for graph.
//!
//! Blocking is bookkeeping, not suspension: an operation that cannot run is
//! appended to the [`WaitQueue`], and if it is waiting on other
//! transactions' locks, one [`WaitEdge`] per conflicting transaction is
//! added to the [`WaitForGraph`]. Operations waiting only for a site to
//! come back have no edges.

use std::collections::{BTreeSet, VecDeque};
use std::fmt::{self, Display};

use repdb_types::{TxnId, Value, VarId};
use serde::{Deserialize, Serialize};

// ============================================================================
// Pending Operations
// ============================================================================

/// The work a queued operation still has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingAction {
    /// Locking read by a read-write transaction.
    Read { var: VarId },
    /// Snapshot read by a read-only transaction.
    SnapshotRead { var: VarId },
    Write { var: VarId, value: Value },
    /// An `end` issued while earlier operations were still queued.
    End,
}

/// An operation waiting in the transaction manager's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOp {
    pub txn: TxnId,
    pub action: PendingAction,
}

impl PendingOp {
    pub fn new(txn: TxnId, action: PendingAction) -> Self {
        Self { txn, action }
    }
}

impl Display for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let txn = self.txn;
        match self.action {
            PendingAction::Read { var } | PendingAction::SnapshotRead { var } => {
                write!(f, "R({txn},{var})")
            }
            PendingAction::Write { var, value } => write!(f, "W({txn},{var},{value})"),
            PendingAction::End => write!(f, "end({txn})"),
        }
    }
}

/// FIFO queue of operations waiting to be retried.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitQueue {
    ops: VecDeque<PendingOp>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `op` unless an identical operation is already queued.
    /// Returns true if it was appended.
    pub fn push(&mut self, op: PendingOp) -> bool {
        if self.ops.contains(&op) {
            return false;
        }
        self.ops.push_back(op);
        true
    }

    /// Returns true if `txn` has any queued operation.
    pub fn has_txn(&self, txn: TxnId) -> bool {
        self.ops.iter().any(|op| op.txn == txn)
    }

    /// Drops every queued operation of `txn`.
    pub fn remove_txn(&mut self, txn: TxnId) {
        self.ops.retain(|op| op.txn != txn);
    }

    pub(crate) fn get(&self, index: usize) -> Option<PendingOp> {
        self.ops.get(index).copied()
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<PendingOp> {
        self.ops.remove(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ============================================================================
// Wait-For Graph
// ============================================================================

/// `waiter` cannot proceed until `blocker` releases a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WaitEdge {
    pub waiter: TxnId,
    pub blocker: TxnId,
}

impl WaitEdge {
    pub fn new(waiter: TxnId, blocker: TxnId) -> Self {
        Self { waiter, blocker }
    }
}

impl Display for WaitEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.waiter, self.blocker)
    }
}

/// The set of wait-for edges between active transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForGraph {
    edges: BTreeSet<WaitEdge>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an edge from `waiter` to each blocker. Self-edges are ignored.
    pub fn add(&mut self, waiter: TxnId, blockers: impl IntoIterator<Item = TxnId>) {
        for blocker in blockers {
            if blocker != waiter {
                self.edges.insert(WaitEdge::new(waiter, blocker));
            }
        }
    }

    /// Returns true if `txn` is waiting on anyone.
    pub fn has_outgoing(&self, txn: TxnId) -> bool {
        self.edges.iter().any(|edge| edge.waiter == txn)
    }

    /// Returns true if `txn` appears on either end of an edge.
    pub fn touches(&self, txn: TxnId) -> bool {
        self.edges
            .iter()
            .any(|edge| edge.waiter == txn || edge.blocker == txn)
    }

    /// Removes every edge sourced from or targeting `txn`.
    pub fn remove_txn(&mut self, txn: TxnId) {
        self.edges
            .retain(|edge| edge.waiter != txn && edge.blocker != txn);
    }

    /// Transactions `txn` is waiting on.
    pub fn blockers_of(&self, txn: TxnId) -> BTreeSet<TxnId> {
        self.edges
            .iter()
            .filter(|edge| edge.waiter == txn)
            .map(|edge| edge.blocker)
            .collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = &WaitEdge> {
        self.edges.iter()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
