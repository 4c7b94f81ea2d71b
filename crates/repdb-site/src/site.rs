//! The data manager for one site.
//!
//! A site answers lock requests for the variables it stores, keeps their
//! current and committed values, and tracks its own failures. All methods
//! are synchronous and deterministic; "blocking" is reported back to the
//! caller as [`SiteReply::Blocked`] and recorded in the waiting queue.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use repdb_types::{CommitStamp, LockMode, SiteId, SiteStatus, Tick, TxnId, Value, VarId};
use serde::{Deserialize, Serialize};

use crate::error::SiteError;
use crate::history::VersionHistory;
use crate::lock::{Lock, LockRequest};

// ============================================================================
// Site Reply
// ============================================================================

/// Outcome of a lock-acquiring request at a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteReply<T> {
    /// The lock was granted (or already held).
    Granted(T),
    /// The site cannot serve the request.
    Down,
    /// Other transactions hold or are queued for a conflicting lock.
    Blocked(BTreeSet<TxnId>),
}

/// A period during which the site was down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownInterval {
    pub failed_at: Tick,
    /// `None` while the site is still down.
    pub recovered_at: Option<Tick>,
}

// ============================================================================
// Site
// ============================================================================

/// Data manager state for one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    id: SiteId,
    status: SiteStatus,
    locks: BTreeMap<VarId, Lock>,
    waiting: BTreeMap<VarId, VecDeque<LockRequest>>,
    histories: BTreeMap<VarId, VersionHistory>,
    current: BTreeMap<VarId, Value>,
    just_recovered: BTreeSet<VarId>,
    downtime: Vec<DownInterval>,
}

impl Site {
    /// Creates an up site storing `variables` with their initial values.
    pub fn new(id: SiteId, variables: impl IntoIterator<Item = (VarId, Value)>) -> Self {
        let mut histories = BTreeMap::new();
        let mut current = BTreeMap::new();
        for (var, value) in variables {
            histories.insert(var, VersionHistory::new(value));
            current.insert(var, value);
        }

        Self {
            id,
            status: SiteStatus::Up,
            locks: BTreeMap::new(),
            waiting: BTreeMap::new(),
            histories,
            current,
            just_recovered: BTreeSet::new(),
            downtime: Vec::new(),
        }
    }

    pub fn id(&self) -> SiteId {
        self.id
    }

    pub fn status(&self) -> SiteStatus {
        self.status
    }

    /// Returns true if `var` is placed on this site.
    pub fn stores(&self, var: VarId) -> bool {
        self.histories.contains_key(&var)
    }

    /// Variables stored at this site, in index order.
    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.histories.keys().copied()
    }

    pub fn lock(&self, var: VarId) -> Option<&Lock> {
        self.locks.get(&var)
    }

    pub fn locks(&self) -> impl Iterator<Item = (VarId, &Lock)> {
        self.locks.iter().map(|(var, lock)| (*var, lock))
    }

    /// Requests queued for `var`, oldest first.
    pub fn waiting(&self, var: VarId) -> impl Iterator<Item = &LockRequest> {
        self.waiting.get(&var).into_iter().flatten()
    }

    pub fn history(&self, var: VarId) -> Option<&VersionHistory> {
        self.histories.get(&var)
    }

    pub fn histories(&self) -> impl Iterator<Item = (VarId, &VersionHistory)> {
        self.histories.iter().map(|(var, history)| (*var, history))
    }

    /// Current value of `var`, including uncommitted writes.
    pub fn current_value(&self, var: VarId) -> Option<Value> {
        self.current.get(&var).copied()
    }

    /// Returns true if `var` has not seen a commit since the site recovered.
    pub fn is_just_recovered(&self, var: VarId) -> bool {
        self.just_recovered.contains(&var)
    }

    pub fn downtime(&self) -> &[DownInterval] {
        &self.downtime
    }

    /// Locks `txn` currently holds here.
    pub fn locks_held_by(&self, txn: TxnId) -> Vec<(VarId, LockMode)> {
        self.locks
            .iter()
            .filter(|(_, lock)| lock.is_held_by(txn))
            .map(|(var, lock)| (*var, lock.mode()))
            .collect()
    }

    /// Latest committed value of every stored variable.
    pub fn snapshot(&self) -> Vec<(VarId, Value)> {
        self.histories
            .iter()
            .map(|(var, history)| (*var, history.latest().value))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Lock requests
    // ------------------------------------------------------------------------

    /// Reports what [`Site::write`] would return, without side effects.
    pub fn check_write(&self, txn: TxnId, var: VarId) -> Result<SiteReply<()>, SiteError> {
        self.ensure_stored(var)?;
        if self.status == SiteStatus::Down {
            return Ok(SiteReply::Down);
        }

        let Some(lock) = self.locks.get(&var) else {
            return Ok(SiteReply::Granted(()));
        };

        if lock.is_sole_holder(txn) {
            match lock.mode() {
                LockMode::Exclusive => return Ok(SiteReply::Granted(())),
                LockMode::Shared => {
                    let queue = self.waiting.get(&var);
                    let others_waiting =
                        queue.is_some_and(|q| q.iter().any(|request| request.txn != txn));
                    let at_head = queue
                        .and_then(VecDeque::front)
                        .is_some_and(|head| *head == LockRequest::new(txn, LockMode::Exclusive));
                    if !others_waiting || at_head {
                        return Ok(SiteReply::Granted(()));
                    }
                }
            }
        }

        let conflicts = lock
            .holders()
            .iter()
            .copied()
            .chain(self.waiting(var).map(|request| request.txn))
            .filter(|holder| *holder != txn)
            .collect();
        Ok(SiteReply::Blocked(conflicts))
    }

    /// Requests an exclusive lock on `var` and, if granted, sets its
    /// current value.
    ///
    /// A blocked request is queued (once) behind the existing waiters.
    pub fn write(
        &mut self,
        txn: TxnId,
        var: VarId,
        value: Value,
    ) -> Result<SiteReply<()>, SiteError> {
        let reply = self.check_write(txn, var)?;
        match &reply {
            SiteReply::Granted(()) => {
                match self.locks.get_mut(&var) {
                    Some(lock) if lock.mode() == LockMode::Shared => lock.promote(),
                    Some(_) => {}
                    None => {
                        self.locks.insert(var, Lock::exclusive(txn));
                    }
                }
                self.current.insert(var, value);
                self.dequeue(txn, var);
                tracing::debug!(site = %self.id, txn = %txn, var = %var, value, "write lock granted");
            }
            SiteReply::Blocked(conflicts) => {
                self.enqueue(var, LockRequest::new(txn, LockMode::Exclusive));
                tracing::debug!(site = %self.id, txn = %txn, var = %var, ?conflicts, "write lock blocked");
            }
            SiteReply::Down => {}
        }
        Ok(reply)
    }

    /// Requests a shared lock on `var` and returns its current value.
    pub fn read(&mut self, txn: TxnId, var: VarId) -> Result<SiteReply<Value>, SiteError> {
        self.ensure_stored(var)?;
        if self.status == SiteStatus::Down {
            return Ok(SiteReply::Down);
        }
        // A writer's own value was written after recovery, so it is never stale.
        if self
            .locks
            .get(&var)
            .is_some_and(|lock| lock.mode() == LockMode::Exclusive && lock.is_held_by(txn))
        {
            return Ok(SiteReply::Granted(self.current[&var]));
        }
        if self.status == SiteStatus::Recovering
            && var.is_replicated()
            && self.just_recovered.contains(&var)
        {
            return Ok(SiteReply::Down);
        }

        let value = self.current[&var];
        let others_waiting = self.waiting(var).any(|request| request.txn != txn);

        let Some(lock) = self.locks.get_mut(&var) else {
            self.locks.insert(var, Lock::shared(txn));
            self.dequeue(txn, var);
            return Ok(SiteReply::Granted(value));
        };

        let reply = match lock.mode() {
            LockMode::Exclusive if lock.is_held_by(txn) => SiteReply::Granted(value),
            LockMode::Exclusive => {
                let holders = lock.holders().clone();
                self.enqueue(var, LockRequest::new(txn, LockMode::Shared));
                SiteReply::Blocked(holders)
            }
            LockMode::Shared if lock.is_held_by(txn) => SiteReply::Granted(value),
            LockMode::Shared if !others_waiting => {
                lock.join(txn);
                self.dequeue(txn, var);
                SiteReply::Granted(value)
            }
            LockMode::Shared => {
                let holders = lock.holders().clone();
                self.enqueue(var, LockRequest::new(txn, LockMode::Shared));
                SiteReply::Blocked(holders)
            }
        };
        Ok(reply)
    }

    /// Multiversion read for a read-only transaction that began at `begin`.
    ///
    /// Returns the latest value committed before `begin`. For replicated
    /// variables the site must also have stayed up from that commit until
    /// `begin`; otherwise the copy may have missed writes and `None` is
    /// returned so the caller can try another site.
    pub fn read_only(&self, var: VarId, begin: Tick) -> Result<Option<Value>, SiteError> {
        self.ensure_stored(var)?;
        if self.status == SiteStatus::Down {
            return Ok(None);
        }

        let Some(version) = self.histories[&var].latest_before(begin) else {
            return Ok(None);
        };

        if var.is_replicated() {
            let committed = version.stamp.tick();
            let failed_in_window = self
                .downtime
                .iter()
                .any(|interval| committed < interval.failed_at && interval.failed_at < begin);
            if failed_in_window {
                return Ok(None);
            }
        }

        Ok(Some(version.value))
    }

    // ------------------------------------------------------------------------
    // Commit, abort and failure
    // ------------------------------------------------------------------------

    /// Appends the current value of `var` to its history at `stamp`.
    ///
    /// Clears the variable's just-recovered mark; once no replicated
    /// variable is marked, a recovering site becomes up.
    pub fn commit_value(&mut self, var: VarId, stamp: CommitStamp) -> Result<(), SiteError> {
        self.ensure_stored(var)?;
        let value = self.current[&var];
        let history = self
            .histories
            .get_mut(&var)
            .ok_or(SiteError::UnknownVariable { site: self.id, var })?;
        history
            .append(value, stamp)
            .map_err(|last| SiteError::NonMonotonicCommit {
                site: self.id,
                var,
                last,
                attempted: stamp,
            })?;

        self.just_recovered.remove(&var);
        if self.status == SiteStatus::Recovering && self.just_recovered.is_empty() {
            self.status = SiteStatus::Up;
            tracing::info!(site = %self.id, "site fully recovered");
        }
        Ok(())
    }

    /// Undoes uncommitted writes by `txn`: every variable it holds
    /// exclusively is reset to its last committed value.
    pub fn revert_to_last_commit_value(&mut self, txn: TxnId) {
        for (var, lock) in &self.locks {
            if lock.mode() == LockMode::Exclusive && lock.is_held_by(txn) {
                self.current.insert(*var, self.histories[var].latest().value);
            }
        }
    }

    /// Releases every lock and queued request of `txn`.
    ///
    /// Waiters are not promoted here; the transaction manager's retry pass
    /// re-issues their requests.
    pub fn release_locks(&mut self, txn: TxnId) {
        self.locks.retain(|_, lock| !lock.release(txn));
        for queue in self.waiting.values_mut() {
            queue.retain(|request| request.txn != txn);
        }
        self.waiting.retain(|_, queue| !queue.is_empty());
    }

    /// Takes the site down at `tick`.
    ///
    /// Lock table and waiting queues are discarded and uncommitted values
    /// are lost. Returns false if the site was already down.
    pub fn fail(&mut self, tick: Tick) -> bool {
        if self.status == SiteStatus::Down {
            return false;
        }

        self.status = SiteStatus::Down;
        self.locks.clear();
        self.waiting.clear();
        self.just_recovered.clear();
        for (var, history) in &self.histories {
            self.current.insert(*var, history.latest().value);
        }
        self.downtime.push(DownInterval {
            failed_at: tick,
            recovered_at: None,
        });
        tracing::info!(site = %self.id, tick = %tick, "site failed");
        true
    }

    /// Brings a down site back at `tick`.
    ///
    /// Replicated variables stay unreadable until they receive a fresh
    /// commit. Returns false if the site was not down.
    pub fn recover(&mut self, tick: Tick) -> bool {
        if self.status != SiteStatus::Down {
            return false;
        }

        if let Some(interval) = self.downtime.last_mut() {
            interval.recovered_at = Some(tick);
        }
        self.just_recovered = self
            .histories
            .keys()
            .copied()
            .filter(VarId::is_replicated)
            .collect();
        self.status = if self.just_recovered.is_empty() {
            SiteStatus::Up
        } else {
            SiteStatus::Recovering
        };
        tracing::info!(site = %self.id, tick = %tick, status = %self.status, "site recovered");
        true
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn ensure_stored(&self, var: VarId) -> Result<(), SiteError> {
        if self.stores(var) {
            Ok(())
        } else {
            Err(SiteError::UnknownVariable { site: self.id, var })
        }
    }

    fn enqueue(&mut self, var: VarId, request: LockRequest) {
        let queue = self.waiting.entry(var).or_default();
        if !queue.contains(&request) {
            queue.push_back(request);
        }
    }

    fn dequeue(&mut self, txn: TxnId, var: VarId) {
        if let Some(queue) = self.waiting.get_mut(&var) {
            queue.retain(|request| request.txn != txn);
            if queue.is_empty() {
                self.waiting.remove(&var);
            }
        }
    }
}
