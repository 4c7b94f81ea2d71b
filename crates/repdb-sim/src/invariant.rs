//! Invariant checkers for workload simulation.
//!
//! Each checker inspects the engine after an operation has been applied.
//! A violation stops the run with the seed and tick that produced it.
//!
//! # Available Checkers
//!
//! - [`VersionOrderChecker`]: Version histories are append-only and strictly
//!   ordered by commit stamp
//! - [`WaitForChecker`]: Wait-for edges connect live, queued transactions
//! - [`LockTableChecker`]: Lock tables only name active read-write
//!   transactions and respect lock modes

use std::collections::BTreeMap;

use repdb_kernel::{Engine, TxnStatus};
use repdb_types::{LockMode, SiteId, SiteStatus, Tick, TxnId, VarId};

use crate::SimError;

// ============================================================================
// Invariant Result
// ============================================================================

/// Result of an invariant check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Ok,
    Violated {
        /// Name of the violated invariant.
        invariant: String,
        message: String,
        /// Additional key/value context.
        context: Vec<(String, String)>,
    },
}

impl InvariantResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, InvariantResult::Ok)
    }

    /// Converts to a `SimError` if violated.
    pub fn into_error(self, tick: Tick) -> Option<SimError> {
        match self {
            InvariantResult::Ok => None,
            InvariantResult::Violated {
                invariant,
                message,
                context,
            } => Some(SimError::InvariantViolation {
                invariant,
                message,
                context,
                tick,
            }),
        }
    }

    fn violated(invariant: &str, message: String, context: Vec<(&str, String)>) -> Self {
        InvariantResult::Violated {
            invariant: invariant.to_string(),
            message,
            context: context
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }
}

// ============================================================================
// Invariant Checker Trait
// ============================================================================

/// A correctness property verified against the engine after every step.
pub trait InvariantChecker {
    /// Returns the name of this checker.
    fn name(&self) -> &'static str;

    /// Checks the property against the current engine state.
    fn check(&mut self, engine: &Engine) -> InvariantResult;

    /// Resets the checker to its initial state.
    fn reset(&mut self);
}

/// All checkers, in the order they run.
pub fn default_checkers() -> Vec<Box<dyn InvariantChecker>> {
    vec![
        Box::new(VersionOrderChecker::new()),
        Box::new(WaitForChecker),
        Box::new(LockTableChecker),
    ]
}

// ============================================================================
// Version Order Checker
// ============================================================================

/// Verifies that every (site, variable) history only grows and that its
/// commit stamps strictly increase.
#[derive(Debug, Default)]
pub struct VersionOrderChecker {
    /// History length seen at the previous check.
    lengths: BTreeMap<(SiteId, VarId), usize>,
    versions_checked: u64,
}

impl VersionOrderChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of versions inspected so far.
    pub fn versions_checked(&self) -> u64 {
        self.versions_checked
    }
}

impl InvariantChecker for VersionOrderChecker {
    fn name(&self) -> &'static str {
        "VersionOrderChecker"
    }

    fn check(&mut self, engine: &Engine) -> InvariantResult {
        for site in engine.sites() {
            for (var, history) in site.histories() {
                let stamps: Vec<_> = history.iter().map(|version| version.stamp).collect();
                self.versions_checked += stamps.len() as u64;

                if let Some(pair) = stamps.windows(2).find(|pair| pair[0] >= pair[1]) {
                    return InvariantResult::violated(
                        "version_order_strict",
                        format!("{var} at site {} is not strictly ordered", site.id()),
                        vec![
                            ("earlier", pair[0].to_string()),
                            ("later", pair[1].to_string()),
                        ],
                    );
                }

                let previous = self.lengths.insert((site.id(), var), stamps.len());
                if let Some(previous) = previous.filter(|len| *len > stamps.len()) {
                    return InvariantResult::violated(
                        "version_history_append_only",
                        format!("{var} at site {} lost committed versions", site.id()),
                        vec![
                            ("previous_len", previous.to_string()),
                            ("current_len", stamps.len().to_string()),
                        ],
                    );
                }
            }
        }
        InvariantResult::Ok
    }

    fn reset(&mut self) {
        self.lengths.clear();
        self.versions_checked = 0;
    }
}

// ============================================================================
// Wait-For Checker
// ============================================================================

/// Verifies that the wait-for graph only links active transactions and
/// that every waiter has a queued operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaitForChecker;

impl InvariantChecker for WaitForChecker {
    fn name(&self) -> &'static str {
        "WaitForChecker"
    }

    fn check(&mut self, engine: &Engine) -> InvariantResult {
        let is_active = |txn: TxnId| {
            engine
                .transaction(txn)
                .is_some_and(|t| t.status() == TxnStatus::Active)
        };

        for edge in engine.wait_for().edges() {
            if edge.waiter == edge.blocker {
                return InvariantResult::violated(
                    "wait_for_no_self_edge",
                    format!("{} waits on itself", edge.waiter),
                    vec![],
                );
            }
            for txn in [edge.waiter, edge.blocker] {
                if !is_active(txn) {
                    return InvariantResult::violated(
                        "wait_for_active_only",
                        format!("edge {edge} names finished transaction {txn}"),
                        vec![],
                    );
                }
            }
            if !engine.queue().has_txn(edge.waiter) {
                return InvariantResult::violated(
                    "wait_for_waiter_queued",
                    format!("{} has edges but nothing queued", edge.waiter),
                    vec![("edge", edge.to_string())],
                );
            }
        }

        for op in engine.queue().iter() {
            if !is_active(op.txn) {
                return InvariantResult::violated(
                    "queue_active_only",
                    format!("queued {op} belongs to a finished transaction"),
                    vec![],
                );
            }
        }
        InvariantResult::Ok
    }

    fn reset(&mut self) {}
}

// ============================================================================
// Lock Table Checker
// ============================================================================

/// Verifies every site's lock table and waiting queues.
#[derive(Debug, Default, Clone, Copy)]
pub struct LockTableChecker;

impl InvariantChecker for LockTableChecker {
    fn name(&self) -> &'static str {
        "LockTableChecker"
    }

    fn check(&mut self, engine: &Engine) -> InvariantResult {
        let is_active_writer = |txn: TxnId| {
            engine
                .transaction(txn)
                .is_some_and(|t| t.is_active() && !t.is_read_only())
        };

        for site in engine.sites() {
            let id = site.id();
            if site.status() == SiteStatus::Down && site.locks().next().is_some() {
                return InvariantResult::violated(
                    "lock_down_site_empty",
                    format!("site {id} is down but holds locks"),
                    vec![],
                );
            }

            for (var, lock) in site.locks() {
                let holders = lock.holders();
                if holders.is_empty() {
                    return InvariantResult::violated(
                        "lock_has_holder",
                        format!("{var} at site {id} is locked by nobody"),
                        vec![],
                    );
                }
                if lock.mode() == LockMode::Exclusive && holders.len() != 1 {
                    return InvariantResult::violated(
                        "lock_exclusive_single_holder",
                        format!("{var} at site {id} has {} exclusive holders", holders.len()),
                        vec![],
                    );
                }
                if let Some(txn) = holders.iter().find(|txn| !is_active_writer(**txn)) {
                    return InvariantResult::violated(
                        "lock_holder_active",
                        format!("{var} at site {id} is held by {txn}, which cannot hold locks"),
                        vec![("mode", lock.mode().to_string())],
                    );
                }
            }

            for var in site.variables() {
                if let Some(request) = site.waiting(var).find(|r| !is_active_writer(r.txn)) {
                    return InvariantResult::violated(
                        "lock_queue_active",
                        format!("{var} at site {id} has a queued request by {}", request.txn),
                        vec![],
                    );
                }
            }
        }
        InvariantResult::Ok
    }

    fn reset(&mut self) {}
}
