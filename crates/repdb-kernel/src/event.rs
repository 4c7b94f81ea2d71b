//! Events reported by the engine.
//!
//! Every operation produces zero or more events; a retry pass may add
//! events for queued operations that finally ran. Events are plain data so
//! the caller can render them as text, serialize them, or assert on them.

use std::collections::BTreeSet;
use std::fmt::{self, Display};

use repdb_types::{SiteId, SiteStatus, Tick, TxnId, Value, VarId};
use serde::{Deserialize, Serialize};

use crate::transaction::{AbortReason, TxnStatus};
use crate::waiting::{PendingOp, WaitEdge};

/// Something observable that happened while applying an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A transaction started.
    Began {
        txn: TxnId,
        read_only: bool,
        tick: Tick,
    },

    /// A write was applied at one site (not yet committed).
    WriteApplied {
        txn: TxnId,
        var: VarId,
        value: Value,
        site: SiteId,
    },

    /// A targeted site was down and did not receive a write.
    WriteSkipped { txn: TxnId, var: VarId, site: SiteId },

    /// A read returned a value.
    ReadValue {
        txn: TxnId,
        var: VarId,
        value: Value,
        site: SiteId,
    },

    /// An operation was queued. Empty `blockers` means it waits for a site
    /// to become available rather than for a lock.
    Waiting {
        op: PendingOp,
        blockers: BTreeSet<TxnId>,
    },

    /// An operation was queued behind the same transaction's earlier
    /// queued operation.
    Deferred { op: PendingOp },

    /// An operation of an already-aborted transaction was dropped.
    Ignored { op: PendingOp },

    /// A transaction committed.
    Committed { txn: TxnId, tick: Tick },

    /// A transaction was aborted.
    Aborted { txn: TxnId, reason: AbortReason },

    /// `end` was received for a transaction that had already been aborted.
    EndedAborted { txn: TxnId, reason: AbortReason },

    SiteFailed { site: SiteId },

    SiteRecovered { site: SiteId, status: SiteStatus },

    /// A recovering site committed a fresh value for every replicated
    /// variable and is fully up.
    SiteUp { site: SiteId },

    Dump { sites: Vec<SiteSnapshot> },

    State(StateSnapshot),
}

/// Latest committed values at one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSnapshot {
    pub site: SiteId,
    pub status: SiteStatus,
    pub values: Vec<(VarId, Value)>,
}

/// One row of the transaction registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnSummary {
    pub txn: TxnId,
    pub start: Tick,
    pub read_only: bool,
    pub status: TxnStatus,
}

/// Transaction manager state, as reported by `querystate()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tick: Tick,
    pub transactions: Vec<TxnSummary>,
    pub sites: Vec<(SiteId, SiteStatus)>,
    pub waiting: Vec<PendingOp>,
    pub wait_for: Vec<WaitEdge>,
}

fn join<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Began {
                txn,
                read_only,
                tick,
            } => {
                let kind = if *read_only { "read-only" } else { "read-write" };
                write!(f, "{txn} begins ({kind}) at time {tick}")
            }
            Event::WriteApplied {
                txn,
                var,
                value,
                site,
            } => write!(f, "{txn} writes {var}={value} at site {site}"),
            Event::WriteSkipped { txn, var, site } => {
                write!(f, "{txn} cannot write {var} at site {site}: site is down")
            }
            Event::ReadValue {
                txn,
                var,
                value,
                site,
            } => write!(f, "{txn} reads {var}: {value} (site {site})"),
            Event::Waiting { op, blockers } if blockers.is_empty() => {
                write!(f, "{op} waits: no site available")
            }
            Event::Waiting { op, blockers } => {
                write!(f, "{op} waits for {}", join(blockers))
            }
            Event::Deferred { op } => {
                write!(f, "{op} queued behind earlier waiting operation of {}", op.txn)
            }
            Event::Ignored { op } => write!(f, "{op} ignored: {} already aborted", op.txn),
            Event::Committed { txn, .. } => write!(f, "{txn} commits"),
            Event::Aborted { txn, reason } => write!(f, "{txn} aborts ({reason})"),
            Event::EndedAborted { txn, reason } => {
                write!(f, "{txn} ends: already aborted ({reason})")
            }
            Event::SiteFailed { site } => write!(f, "site {site} fails"),
            Event::SiteRecovered { site, status } => {
                write!(f, "site {site} recovers ({status})")
            }
            Event::SiteUp { site } => write!(f, "site {site} is fully up"),
            Event::Dump { sites } => {
                for (i, snapshot) in sites.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{snapshot}")?;
                }
                Ok(())
            }
            Event::State(state) => write!(f, "{state}"),
        }
    }
}

impl Display for SiteSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = join(
            self.values
                .iter()
                .map(|(var, value)| format!("{var}: {value}")),
        );
        write!(f, "site {} - {values}", self.site)?;
        if self.status != SiteStatus::Up {
            write!(f, " ({})", self.status)?;
        }
        Ok(())
    }
}

impl Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "time: {}", self.tick)?;
        for row in &self.transactions {
            let kind = if row.read_only { "RO" } else { "RW" };
            writeln!(f, "{} {kind} start={} {}", row.txn, row.start, row.status)?;
        }
        writeln!(
            f,
            "sites: {}",
            join(self.sites.iter().map(|(site, status)| format!("{site}={status}")))
        )?;
        writeln!(f, "waiting: [{}]", join(&self.waiting))?;
        write!(f, "waits-for: [{}]", join(&self.wait_for))
    }
}
