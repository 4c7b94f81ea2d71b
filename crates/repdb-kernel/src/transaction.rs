//! Transaction registry entries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

use repdb_types::{SiteId, Tick, TxnId, VarId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a transaction. Terminal states are written once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

impl Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnStatus::Active => write!(f, "active"),
            TxnStatus::Committed => write!(f, "committed"),
            TxnStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Why a transaction was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Chosen as the youngest member of a wait-for cycle.
    Deadlock,
    /// A site it had accessed failed before it committed.
    SiteFailure(SiteId),
}

impl Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Deadlock => write!(f, "deadlock victim"),
            AbortReason::SiteFailure(site) => write!(f, "site {site} failed"),
        }
    }
}

/// A transaction known to the transaction manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: TxnId,
    start: Tick,
    read_only: bool,
    status: TxnStatus,
    abort_reason: Option<AbortReason>,
    /// Set once `end` has been received, even if the commit is deferred.
    ended: bool,
    /// Sites where the transaction holds (or held) a granted lock.
    accessed: BTreeSet<SiteId>,
    /// Sites each variable was actually written at.
    writes: BTreeMap<VarId, BTreeSet<SiteId>>,
}

impl Transaction {
    pub fn new(id: TxnId, start: Tick, read_only: bool) -> Self {
        Self {
            id,
            start,
            read_only,
            status: TxnStatus::Active,
            abort_reason: None,
            ended: false,
            accessed: BTreeSet::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Tick of the `begin`/`beginRO` operation.
    pub fn start(&self) -> Tick {
        self.start
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == TxnStatus::Active
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn has_accessed(&self, site: SiteId) -> bool {
        self.accessed.contains(&site)
    }

    pub fn writes(&self) -> &BTreeMap<VarId, BTreeSet<SiteId>> {
        &self.writes
    }

    pub(crate) fn record_access(&mut self, site: SiteId) {
        self.accessed.insert(site);
    }

    pub(crate) fn record_write(&mut self, var: VarId, site: SiteId) {
        self.accessed.insert(site);
        self.writes.entry(var).or_default().insert(site);
    }

    pub(crate) fn mark_ended(&mut self) {
        self.ended = true;
    }

    pub(crate) fn mark_committed(&mut self) {
        debug_assert!(self.is_active(), "terminal status is write-once");
        self.status = TxnStatus::Committed;
    }

    pub(crate) fn mark_aborted(&mut self, reason: AbortReason) {
        debug_assert!(self.is_active(), "terminal status is write-once");
        self.status = TxnStatus::Aborted;
        self.abort_reason = Some(reason);
    }
}
